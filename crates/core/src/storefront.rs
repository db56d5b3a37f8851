//! Cart and refund requests used by the storefront assistants.
//!
//! Every caller-supplied value travels through `parameters`; none of them is
//! ever spliced into statement text.

use serde_json::Value;

use crate::codec::QueryRequest;

pub const ADD_TO_CART: &str = "INSERT INTO shopping_cart (customer_id, product_id, quantity, unit_price) \
     VALUES (:customer_id, :product_id, :quantity, :unit_price)";

pub const REMOVE_FROM_CART: &str =
    "DELETE FROM shopping_cart WHERE customer_id = :customer_id AND product_id = :product_id";

pub const UPDATE_QUANTITY_IN_CART: &str = "UPDATE shopping_cart SET quantity = :quantity \
     WHERE customer_id = :customer_id AND product_id = :product_id";

pub const APPROVE_REFUND: &str =
    "UPDATE refund SET status = 'Approved' WHERE refund_id = :refund_id";

pub const REJECT_REFUND: &str =
    "UPDATE refund SET status = 'Rejected', reason = :reason WHERE refund_id = :refund_id";

pub fn add_to_cart(customer_id: i64, product_id: i64, quantity: i64, unit_price: f64) -> QueryRequest {
    QueryRequest::new(ADD_TO_CART)
        .with_parameter("customer_id", customer_id)
        .with_parameter("product_id", product_id)
        .with_parameter("quantity", quantity)
        .with_parameter("unit_price", price(unit_price))
}

pub fn remove_from_cart(customer_id: i64, product_id: i64) -> QueryRequest {
    QueryRequest::new(REMOVE_FROM_CART)
        .with_parameter("customer_id", customer_id)
        .with_parameter("product_id", product_id)
}

pub fn update_quantity_in_cart(quantity: i64, customer_id: i64, product_id: i64) -> QueryRequest {
    QueryRequest::new(UPDATE_QUANTITY_IN_CART)
        .with_parameter("quantity", quantity)
        .with_parameter("customer_id", customer_id)
        .with_parameter("product_id", product_id)
}

pub fn approve_refund(refund_id: i64) -> QueryRequest {
    QueryRequest::new(APPROVE_REFUND).with_parameter("refund_id", refund_id)
}

pub fn reject_refund(refund_id: i64, reason: &str) -> QueryRequest {
    QueryRequest::new(REJECT_REFUND)
        .with_parameter("refund_id", refund_id)
        .with_parameter("reason", reason)
}

// Non-finite prices have no JSON form; they bind as NULL and the column
// constraint decides.
fn price(value: f64) -> Value {
    serde_json::Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}
