//! Decode the captured sample listing page through the real wire types.

use oct_adapters::{normalize, SearchResponse};

fn sample_page() -> SearchResponse {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/catalog/sample-page.json");
    let raw = std::fs::read_to_string(path).expect("sample page fixture");
    serde_json::from_str(&raw).expect("sample page decodes")
}

#[test]
fn sample_page_decodes_with_paging_metadata() {
    let page = sample_page();
    assert_eq!(page.records.len(), 3);
    assert_eq!(page.paging.and_then(|p| p.page_count), Some(17));
    assert_eq!(page.total_hits, Some(793));
}

#[test]
fn sample_page_normalizes_to_drafts() {
    let drafts: Vec<_> = sample_page()
        .records
        .into_iter()
        .filter_map(normalize)
        .collect();

    // The sku-less third record is dropped.
    assert_eq!(drafts.len(), 2);

    let tv = &drafts[0];
    assert_eq!(tv.sku, "231466");
    assert_eq!(tv.brand, "LG");
    assert_eq!(tv.outlet_price, Some(7990.0));
    assert_eq!(tv.original_price, Some(14990.0));
    assert_eq!(tv.category, "TV");
    assert_eq!(tv.bullet_points.len(), 3);
    assert!(tv.b_grade);
    assert!(tv.buyable_online);
    assert!(tv.store_stock.is_some());

    let washer = &drafts[1];
    assert_eq!(washer.sku, "187220");
    assert_eq!(washer.brand, "");
    assert_eq!(washer.outlet_price, Some(3490.0));
    assert_eq!(washer.original_price, Some(3490.0));
    assert_eq!(washer.category, "");
    assert!(!washer.buyable_online);
}
