//! Fixtures shared by unit tests.

use std::sync::Arc;

use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::prelude::SessionContext;

use crate::engine::DataFusionEngine;

/// Five orders: one NULL customer, one NULL amount, statuses open/closed/pending.
pub fn orders_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("customer", DataType::Utf8, true),
        Field::new("amount", DataType::Float64, true),
        Field::new("status", DataType::Utf8, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])),
            Arc::new(StringArray::from(vec![
                Some("alice"),
                Some("bob"),
                None,
                Some("alice"),
                Some("carol"),
            ])),
            Arc::new(Float64Array::from(vec![
                Some(10.0),
                Some(25.5),
                None,
                Some(40.0),
                Some(5.0),
            ])),
            Arc::new(StringArray::from(vec![
                "open", "closed", "open", "pending", "closed",
            ])),
        ],
    )
    .unwrap()
}

/// A DataFusion engine with `orders` registered.
pub async fn orders_engine() -> DataFusionEngine {
    let engine = DataFusionEngine::with_pool_size(SessionContext::new(), 2).unwrap();
    engine
        .register_batches("orders", vec![orders_batch()])
        .await
        .unwrap();
    engine
}
