mod common;

use inventory_journal::{InventoryEngine, InventoryKey, LowStockScanner};

fn skus(codes: &[&str]) -> Vec<String> {
    codes.iter().map(|s| s.to_string()).collect()
}

/// K1 at 3 and K2 at 10, threshold 5: only K1 is reported.
#[tokio::test]
async fn reports_only_keys_below_threshold() {
    let (_dir, path) = common::create_temp_db_file("low_stock.db");
    let engine = InventoryEngine::open(&path, common::engine_config(2)).await.unwrap();

    engine.register(InventoryKey::new("K1", 1), 3, 0).await.unwrap();
    engine.register(InventoryKey::new("K2", 1), 10, 0).await.unwrap();

    let low = engine.find_low_stock(skus(&["K1", "K2"]), 1, 5).await.unwrap();
    assert_eq!(low.len(), 1);
    assert_eq!(low[0].key, InventoryKey::new("K1", 1));
    assert_eq!(low[0].quantity_on_hand, 3);

    engine.shutdown().await;
}

/// The scan sees journal rows whether or not they have been folded.
#[tokio::test]
async fn scan_result_is_independent_of_compaction() {
    let (_dir, path) = common::create_temp_db_file("low_stock_journal.db");
    let engine = InventoryEngine::open(&path, common::engine_config(2)).await.unwrap();
    let key = InventoryKey::new("K1", 1);

    engine.register(key.clone(), 10, 4).await.unwrap();
    engine.adjust_on_hand(key.clone(), -4).await.unwrap();
    engine.adjust_on_hand(key.clone(), -3).await.unwrap();

    let before = engine.find_low_stock(vec![], 1, 5).await.unwrap();
    let reorder_before = engine.find_below_reorder_minimum(vec![], 1).await.unwrap();

    engine.compact(key.clone()).await.unwrap();

    let after = engine.find_low_stock(vec![], 1, 5).await.unwrap();
    let reorder_after = engine.find_below_reorder_minimum(vec![], 1).await.unwrap();

    assert_eq!(before, after);
    assert_eq!(reorder_before, reorder_after);
    assert_eq!(after[0].quantity_on_hand, 3);
    assert_eq!(after[0].reorder_minimum, Some(4));

    engine.shutdown().await;
}

/// Raising the reorder minimum brings a key into the reorder report.
#[test]
fn reorder_minimum_changes_are_visible() {
    let (_dir, path) = common::create_temp_db_file("reorder.db");
    let conn = common::open_read_write(&path);
    let writer = inventory_journal::InventoryWriter::default();
    let key = InventoryKey::new("K1", 1);

    writer.register(&conn, &key, 8, 2).unwrap();
    assert!(LowStockScanner
        .find_below_reorder_minimum(&conn, &skus(&["K1"]), 1)
        .unwrap()
        .is_empty());

    assert!(writer.set_reorder_minimum(&conn, &key, 8).unwrap());
    let low = LowStockScanner
        .find_below_reorder_minimum(&conn, &skus(&["K1"]), 1)
        .unwrap();
    assert_eq!(low.len(), 1);
    assert_eq!(low[0].available(), 8);
}
