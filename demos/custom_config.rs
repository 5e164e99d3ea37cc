/// 演示如何从 JSON 配置打开数据库，以及手动控制游标。
use datumdb::{Datum, DatumDb, DatumDbConfig, Mode, Store, StoreOptions};
use std::fs;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let data_dir = "./data_custom";

    // 1. 清理旧数据（确保示例从干净状态开始）
    if Path::new(data_dir).exists() {
        println!("Cleaning up old data directory...");
        fs::remove_dir_all(data_dir)?;
    }

    // 2. 写入 1000 条记录，再把前 400 条覆盖一遍
    let mut db = DatumDb::open_with_config(DatumDbConfig::new(data_dir, Mode::Write).with_sync_writes(false))?;
    for i in 0..1000 {
        let datum = Datum::new(3, 8, 8).with_data(vec![0u8; 192]).with_label(i % 10);
        db.put(&format!("doc_{:04}", i), &datum)?;
    }
    db.commit()?;
    for i in 0..400 {
        let datum = Datum::new(3, 8, 8).with_data(vec![255u8; 192]).with_label(i % 10);
        db.put(&format!("doc_{:04}", i), &datum)?;
    }
    db.commit()?;
    print_stats(&db.stats()?);
    db.close()?;

    // 3. 手动压缩
    println!("\nTriggering manual compaction...");
    let store = Store::open(data_dir, StoreOptions::new().with_auto_compact(false))?;
    store.compact()?;
    store.close()?;

    // 4. 从 JSON 配置以循环模式读取
    let config_path = Path::new(data_dir).join("read.json");
    fs::write(
        &config_path,
        format!(r#"{{ "source": "{}", "mode": "read", "loop": true }}"#, data_dir),
    )?;
    let db = DatumDb::open_with_config(DatumDbConfig::from_json_file(&config_path)?)?;
    print_stats(&db.stats()?);

    let mut generator = db.generator()?;
    let mut seen = 0;
    while seen < 1500 && generator.valid() {
        generator.advance()?;
        seen += 1;
    }
    if let Some((key, datum)) = generator.current()? {
        println!("\nAfter {} steps: {} (label {})", seen, key, datum.label);
    }

    // 清理
    drop(generator);
    drop(db);
    fs::remove_dir_all(data_dir)?;
    println!("\nExample completed successfully.");

    Ok(())
}

fn print_stats(stats: &datumdb::DbStats) {
    println!("  记录数: {}", stats.live_keys);
    println!("  有效字节: {}", stats.live_bytes);
    println!("  数据文件大小: {} bytes", stats.data_file_size);
    println!("  可回收: {} bytes ({:.2}%)", stats.garbage_bytes, stats.garbage_ratio * 100.0);
}
