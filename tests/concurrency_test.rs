//! Shared-pool thread-safety tests: many threads checking builders in and
//! out of one pool concurrently, with and without schema validation.

use std::sync::Arc;

use rayon::prelude::*;

use xml_builder_pool::{BasicParserPool, PoolError, Schema};

const SIMPLE_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:element name="root" type="xs:string"/>
</xs:schema>"#;

#[test]
fn test_parallel_parse_through_shared_pool() {
    let pool = Arc::new(BasicParserPool::new());
    pool.set_max_pool_size(4).unwrap();
    pool.initialize().unwrap();

    let results: Vec<_> = (0..200)
        .into_par_iter()
        .map(|i| {
            let xml = format!("<root><item>{i}</item></root>");
            pool.parse(xml.as_bytes())
                .map(|doc| doc.root_element().unwrap().child_element_count())
        })
        .collect();

    for result in results {
        assert_eq!(result.unwrap(), 1);
    }

    // The idle cache never exceeds its bound, however many threads ran.
    assert!(pool.pool_size() <= 4);
}

#[test]
fn test_parallel_schema_validation() {
    let pool = Arc::new(BasicParserPool::new());
    pool.set_max_pool_size(8).unwrap();
    pool.set_schema(Some(Schema::parse(SIMPLE_XSD.as_bytes()).unwrap()))
        .unwrap();
    pool.initialize().unwrap();

    let outcomes: Vec<_> = (0..100)
        .into_par_iter()
        .map(|i| {
            if i % 2 == 0 {
                pool.parse(b"<root>fine</root>").is_ok()
            } else {
                matches!(pool.parse(b"<wrong/>"), Err(PoolError::Parse { .. }))
            }
        })
        .collect();

    assert!(outcomes.into_iter().all(|ok| ok));
    assert!(pool.pool_size() <= 8);
}

#[test]
fn test_concurrent_obtain_and_return_races() {
    let pool = Arc::new(BasicParserPool::new());
    pool.set_max_pool_size(2).unwrap();
    pool.initialize().unwrap();

    (0..100).into_par_iter().for_each(|i| {
        let handle = pool.obtain().unwrap();
        let _ = handle.parse_bytes(b"<root/>");
        if i % 3 == 0 {
            // Explicit return immediately followed by drop: exactly one of
            // the two paths may check the engine in.
            handle.return_to_pool();
        }
        drop(handle);
    });

    assert!(pool.pool_size() <= 2);
}

#[test]
fn test_outstanding_handles_are_unbounded() {
    let pool = Arc::new(BasicParserPool::new());
    pool.set_max_pool_size(1).unwrap();
    pool.initialize().unwrap();

    // Far more live handles than the idle bound; obtain never blocks.
    let handles: Vec<_> = (0..32).map(|_| pool.obtain().unwrap()).collect();
    for handle in &handles {
        assert!(handle.parse_bytes(b"<root/>").is_ok());
    }
    drop(handles);

    assert_eq!(pool.pool_size(), 1);
}
