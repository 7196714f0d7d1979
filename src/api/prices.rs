use super::{ApiError, ApiState};
use crate::models::timestamp_now;
use crate::storage::{read_document, write_document};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Map, Value};
use tracing::info;

pub async fn index() -> Json<Value> {
    Json(json!({
        "status": "online",
        "description": "Product prices collected from e-commerce sites",
        "endpoints": {
            "GET /prices": "All prices",
            "GET /prices/products": "Product names",
            "GET /prices/produtos": "Product names, legacy route",
            "GET /prices/{product}": "Prices for one product",
            "POST|PUT /prices": "Replace the whole price document"
        }
    }))
}

pub async fn all_prices(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(read_document(&state.prices_path).await?))
}

pub async fn product_names(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let names = load_mapping(&state).await?.into_iter().map(|(k, _)| k).collect::<Vec<_>>();
    Ok(Json(json!({ "products": names })))
}

/// Same listing under the route and key existing automation flows read
pub async fn product_names_legacy(
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    let names = load_mapping(&state).await?.into_iter().map(|(k, _)| k).collect::<Vec<_>>();
    Ok(Json(json!({ "produtos": names })))
}

pub async fn product_prices(
    State(state): State<ApiState>,
    Path(product): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let mut prices = load_mapping(&state).await?;
    let record = prices.remove(&product).ok_or(ApiError::ProductNotFound)?;

    let mut body = Map::new();
    body.insert(product, record);
    Ok(Json(Value::Object(body)))
}

/// Replace the whole document. Records without a `timestamp` get one.
pub async fn replace_prices(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::BadRequest("no JSON data provided".to_string()));
    }

    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {}", e)))?;

    let mut prices = match value {
        Value::Object(map) if map.is_empty() => {
            return Err(ApiError::BadRequest("no JSON data provided".to_string()))
        }
        Value::Object(map) => map,
        Value::Null => return Err(ApiError::BadRequest("no JSON data provided".to_string())),
        _ => {
            return Err(ApiError::BadRequest(
                "expected a JSON object keyed by product".to_string(),
            ))
        }
    };

    let stamp = timestamp_now();
    for (product, record) in prices.iter_mut() {
        let record = record.as_object_mut().ok_or_else(|| {
            ApiError::BadRequest(format!("record for '{}' must be an object", product))
        })?;
        if !record.contains_key("timestamp") {
            record.insert("timestamp".to_string(), Value::String(stamp.clone()));
        }
    }

    let count = prices.len();
    write_document(&state.prices_path, &prices)
        .await
        .map_err(|e| ApiError::WriteFailed(e.to_string()))?;

    info!("Replaced price document with {} products", count);
    Ok(Json(json!({ "message": "prices updated", "products": count })))
}

/// Read the document as a product mapping without an error marker
async fn load_mapping(state: &ApiState) -> Result<Map<String, Value>, ApiError> {
    match read_document(&state.prices_path).await? {
        Value::Object(map) => {
            if let Some(Value::String(marker)) = map.get("error") {
                return Err(ApiError::Marked(marker.clone()));
            }
            Ok(map)
        }
        _ => Err(ApiError::NotAMapping),
    }
}
