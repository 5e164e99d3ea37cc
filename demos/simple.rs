use datumdb::{Datum, DatumDb, DatumDbConfig, Mode};

fn main() -> anyhow::Result<()> {
    // 确保数据目录不存在（为了演示目的，先清理）
    let data_dir = "./data_simple";
    if std::path::Path::new(data_dir).exists() {
        std::fs::remove_dir_all(data_dir)?;
    }

    // 创建新数据库并分批写入
    let mut db = DatumDb::open_with_config(DatumDbConfig::new(data_dir, Mode::New))?;
    for i in 0..10 {
        let datum = Datum::new(1, 2, 2)
            .with_data(vec![i as u8; 4])
            .with_label(i % 2);
        db.put(&format!("img_{:03}", i), &datum)?;
        if db.pending() == 4 {
            db.commit()?;
        }
    }
    db.commit()?;
    db.close()?;

    // 以只读方式打开，循环读取 15 条
    let db = DatumDb::open_with_config(DatumDbConfig::new(data_dir, Mode::Read).with_loop(true))?;
    for record in db.generator()?.take(15) {
        let (key, datum) = record?;
        println!("{} label={}", key, datum.label);
    }

    // 随机读取
    let datum = db.get("img_007")?;
    println!("img_007: {:?}", datum.data);

    drop(db);
    std::fs::remove_dir_all(data_dir)?;

    Ok(())
}
