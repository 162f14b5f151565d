mod common;

use ridership_ablation::prepare::{build_series, load, preprocess};
use ridership_ablation::schema::MISSING_SENTINEL;

#[test]
fn sentinel_never_survives_preprocessing() -> anyhow::Result<()> {
    let dir = common::tmp_dir("prep_sentinel");
    let path = common::write_ridership_csv(&dir, 48);
    let table = preprocess(&load(&path)?)?;

    assert_eq!(table.index.len(), 48);
    assert!(table.index.windows(2).all(|w| w[0] < w[1]));
    for col in &table.values {
        for v in col {
            let v = v.expect("no missing cell after imputation");
            assert_ne!(v, MISSING_SENTINEL);
        }
    }
    assert!(table.unresolved_columns().is_empty());
    Ok(())
}

#[test]
fn imputation_is_idempotent() -> anyhow::Result<()> {
    let dir = common::tmp_dir("prep_idem");
    let path = common::write_ridership_csv(&dir, 30);
    let once = preprocess(&load(&path)?)?;
    let twice = once.clone().impute();
    assert_eq!(once, twice);
    Ok(())
}

#[test]
fn future_series_is_present_even_without_columns() -> anyhow::Result<()> {
    let dir = common::tmp_dir("prep_future");
    let path = common::write_ridership_csv(&dir, 30);
    let table = preprocess(&load(&path)?)?;
    let set = build_series(&table, "in", &[], &[])?;
    assert!(set.past.is_none());
    assert_eq!(set.future.width(), 0);
    assert_eq!(set.future.len(), set.target.len());
    Ok(())
}

#[test]
fn unreadable_path_is_an_error() {
    let dir = common::tmp_dir("prep_missing");
    assert!(load(&dir.join("nope.csv")).is_err());
}
