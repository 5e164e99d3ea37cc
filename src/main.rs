use std::path::PathBuf;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use datumdb::{Datum, DatumDb, DatumDbConfig, Mode, Store, StoreOptions};

/// 训练数据记录库的命令行工具。
#[derive(Parser)]
#[command(name = "datumdb", version, about)]
struct Cli {
    /// JSON 配置文件，可代替 dump 的路径参数。
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 打印记录数和磁盘占用。
    Count { path: PathBuf },
    /// 按键序打印记录。
    Dump {
        path: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// 以 JSON 行输出完整记录。
        #[arg(long)]
        json: bool,
    },
    /// 写入合成记录，每 `batch` 条提交一次。
    Fill {
        path: PathBuf,
        #[arg(long, default_value_t = 1000)]
        count: usize,
        #[arg(long, default_value_t = 100)]
        batch: usize,
    },
    /// 回收被覆盖和删除的记录占用的空间。
    Compact { path: PathBuf },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Count { path } => {
            let db = DatumDb::open_with_config(DatumDbConfig::new(&path, Mode::Read))?;
            let stats = db.stats()?;
            println!("records: {}", stats.live_keys);
            println!("data file size: {} bytes", stats.data_file_size);
            println!("reclaimable: {} bytes ({:.1}%)", stats.garbage_bytes, stats.garbage_ratio * 100.0);
        }
        Command::Dump { path, limit, json } => {
            let config = match (cli.config, path) {
                (Some(file), _) => DatumDbConfig::from_json_file(&file)
                    .with_context(|| format!("loading config {:?}", file))?,
                (None, Some(path)) => DatumDbConfig::new(path, Mode::Read),
                (None, None) => bail!("dump needs a path or --config"),
            };
            if config.mode != Mode::Read {
                bail!("dump needs a config in read mode, got {:?}", config.mode);
            }
            let db = DatumDb::open_with_config(config)?;
            for record in db.generator()?.take(limit) {
                let (key, datum) = record?;
                if json {
                    println!("{}", serde_json::json!({ "key": key, "datum": datum }));
                } else {
                    println!(
                        "{} label={} shape={}x{}x{} bytes={} floats={}",
                        key, datum.label, datum.channels, datum.height, datum.width,
                        datum.data.len(), datum.float_data.len()
                    );
                }
            }
        }
        Command::Fill { path, count, batch } => {
            if batch == 0 {
                bail!("--batch must be positive");
            }
            let mut db = DatumDb::open_with_config(DatumDbConfig::new(&path, Mode::Write))?;
            for i in 0..count {
                let datum = Datum::new(1, 4, 4)
                    .with_data(vec![(i % 256) as u8; 16])
                    .with_label((i % 10) as i32);
                db.put(&format!("{:08}", i), &datum)?;
                if db.pending() >= batch {
                    db.commit()?;
                }
            }
            db.commit()?;
            println!("wrote {} records to {:?}", count, path);
        }
        Command::Compact { path } => {
            let options = StoreOptions::new()
                .with_create_if_missing(false)
                .with_auto_compact(false);
            let store = Store::open(&path, options)?;
            let before = store.stats()?.data_file_size;
            store.compact()?;
            println!("compacted {:?}: {} -> {} bytes", path, before, store.stats()?.data_file_size);
        }
    }

    Ok(())
}
