#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

pub fn tmp_dir(name: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!(
        "ablation_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));
    fs::create_dir_all(&p).expect("create tmp dir");
    p
}

/// Hourly ridership starting 2024-01-01 00:00 with a daily cycle, written
/// newest-first so the loader has to sort. `temp` has one sentinel gap.
pub fn write_ridership_csv(dir: &std::path::Path, hours: usize) -> PathBuf {
    let mut lines = vec!["year,month,date,time,in,weather,temp,holiday".to_string()];
    for i in (0..hours).rev() {
        let day = 1 + i / 24;
        let hour = i % 24;
        let peak = if (7..=9).contains(&hour) || (17..=19).contains(&hour) {
            80.0
        } else {
            20.0
        };
        let weather = (i % 5) as f64;
        let temp = if i == 10 {
            "-9999.0".to_string()
        } else {
            format!("{:.1}", 10.0 + (hour as f64) / 2.0)
        };
        let holiday = if day % 7 == 0 { 1 } else { 0 };
        let ridership = peak - 3.0 * weather + holiday as f64 * -10.0;
        lines.push(format!(
            "2024,1,{day},{hour},{ridership},{weather},{temp},{holiday}"
        ));
    }
    let path = dir.join("ridership.csv");
    fs::write(&path, lines.join("\n") + "\n").expect("write ridership csv");
    path
}
