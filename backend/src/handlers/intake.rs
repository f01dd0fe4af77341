//! Machine intake endpoint
//!
//! Accepts the English payload and the Spanish keys older agents still send
//! (`tipo`, `cliente`, `productos`, ...). Quantities may arrive as numbers or
//! numeric strings; a header `bodega` is the default warehouse for its lines.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::services::order::{CreateOrderInput, CreatedOrder};
use crate::services::OrderService;
use crate::AppState;
use shared::IntakeLine;

#[derive(Debug, Default, Deserialize)]
pub struct IntakePayload {
    #[serde(rename = "type", alias = "tipo", alias = "order_type", default)]
    pub order_type: Option<String>,
    #[serde(alias = "numero_pedido", alias = "numero_st", default)]
    pub external_reference: Option<String>,
    #[serde(alias = "cliente", alias = "client_name", default)]
    pub client: Option<String>,
    #[serde(alias = "transporte", default)]
    pub carrier: Option<String>,
    #[serde(alias = "observacion", default)]
    pub note: Option<String>,
    #[serde(alias = "urgente", default)]
    pub urgent: bool,
    #[serde(alias = "bodega", default)]
    pub warehouse_code: Option<String>,
    #[serde(default)]
    pub affects_stock: Option<bool>,
    #[serde(alias = "productos", default)]
    pub line_items: Vec<IntakeProduct>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IntakeProduct {
    #[serde(alias = "codigo", default)]
    pub item_code: Option<String>,
    #[serde(alias = "descripcion", default)]
    pub description: Option<String>,
    #[serde(alias = "cantidad", default)]
    pub quantity: Option<QuantityValue>,
    #[serde(alias = "bodega", default)]
    pub warehouse_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QuantityValue {
    Number(i64),
    Text(String),
}

impl QuantityValue {
    fn parse(&self) -> Result<i64, AppError> {
        match self {
            QuantityValue::Number(n) => Ok(*n),
            QuantityValue::Text(text) if text.trim().is_empty() => Ok(0),
            QuantityValue::Text(text) => text.trim().parse::<i64>().map_err(|_| AppError::Validation {
                field: "line_items".to_string(),
                message: format!("'{}' is not a valid quantity", text.trim()),
                message_es: format!("'{}' no es una cantidad válida", text.trim()),
            }),
        }
    }
}

impl IntakePayload {
    /// Normalize into the shared creation input
    pub fn into_create_input(self) -> AppResult<CreateOrderInput> {
        let order_type = self
            .order_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Validation {
                field: "type".to_string(),
                message: "order type is required".to_string(),
                message_es: "El tipo de solicitud es obligatorio".to_string(),
            })?;

        let header_warehouse = self.warehouse_code.clone();
        let mut line_items = Vec::with_capacity(self.line_items.len());
        for product in self.line_items {
            let quantity = product.quantity.as_ref().map(QuantityValue::parse).transpose()?;
            let warehouse_code = product
                .warehouse_code
                .filter(|w| !w.trim().is_empty())
                .or_else(|| header_warehouse.clone());
            line_items.push(IntakeLine {
                item_code: product.item_code,
                description: product.description,
                quantity,
                warehouse_code,
            });
        }

        Ok(CreateOrderInput {
            order_type,
            external_reference: self.external_reference,
            client_name: self.client.unwrap_or_default(),
            carrier: self.carrier,
            note: self.note,
            urgent: self.urgent,
            affects_stock: self.affects_stock.unwrap_or(true),
            line_items,
        })
    }
}

/// Create an order on behalf of an external agent
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<IntakePayload>,
) -> AppResult<(StatusCode, Json<CreatedOrder>)> {
    let input = payload.into_create_input()?;
    let catalogs = state.catalogs.get_or_load(&state.db).await?;

    let service = OrderService::new(state.db);
    let created = service.create_order(input, &catalogs, None).await?;

    tracing::info!(order_id = created.order.order.id, "Order received through intake");
    Ok((StatusCode::CREATED, Json(created)))
}
