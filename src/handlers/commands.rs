//! Command definitions
//!
//! Commands represent intentions to change the system state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{DiscountKind, OrderStatus};
use crate::domain::Money;

/// Commands accepted by the order handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OrderCommand {
    OpenOrder {
        order_id: Uuid,
        customer_id: Uuid,
    },
    AddItem {
        order_id: Uuid,
        sku: String,
        description: String,
        quantity: u32,
        unit_price: Money,
    },
    RemoveItem {
        order_id: Uuid,
        sku: String,
    },
    ApplyDiscount {
        order_id: Uuid,
        discount: DiscountKind,
    },
    FinalizeOrder {
        order_id: Uuid,
    },
    CancelOrder {
        order_id: Uuid,
        reason: String,
    },
}

impl OrderCommand {
    /// Open a new order with a fresh id
    pub fn open(customer_id: Uuid) -> Self {
        OrderCommand::OpenOrder {
            order_id: Uuid::new_v4(),
            customer_id,
        }
    }

    pub fn add_item(
        order_id: Uuid,
        sku: impl Into<String>,
        description: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        OrderCommand::AddItem {
            order_id,
            sku: sku.into(),
            description: description.into(),
            quantity,
            unit_price,
        }
    }

    /// The order this command targets
    pub fn order_id(&self) -> Uuid {
        match self {
            OrderCommand::OpenOrder { order_id, .. }
            | OrderCommand::AddItem { order_id, .. }
            | OrderCommand::RemoveItem { order_id, .. }
            | OrderCommand::ApplyDiscount { order_id, .. }
            | OrderCommand::FinalizeOrder { order_id }
            | OrderCommand::CancelOrder { order_id, .. } => *order_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OrderCommand::OpenOrder { .. } => "open_order",
            OrderCommand::AddItem { .. } => "add_item",
            OrderCommand::RemoveItem { .. } => "remove_item",
            OrderCommand::ApplyDiscount { .. } => "apply_discount",
            OrderCommand::FinalizeOrder { .. } => "finalize_order",
            OrderCommand::CancelOrder { .. } => "cancel_order",
        }
    }
}

/// Result of a successful order command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub order_id: Uuid,
    /// Version after the command's events were appended
    pub version: i64,
    pub event_ids: Vec<Uuid>,
    pub status: OrderStatus,
    pub total: Money,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_command_accessors() {
        let customer = Uuid::new_v4();
        let open = OrderCommand::open(customer);
        let order_id = open.order_id();

        let add = OrderCommand::add_item(order_id, "SKU-1", "Widget", 2, Money::zero());
        assert_eq!(add.order_id(), order_id);
        assert_eq!(add.name(), "add_item");
        assert_eq!(OrderCommand::FinalizeOrder { order_id }.name(), "finalize_order");
    }

    #[test]
    fn test_order_command_json_shape() {
        let command = OrderCommand::ApplyDiscount {
            order_id: Uuid::nil(),
            discount: DiscountKind::Percentage(dec!(10)),
        };

        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["command"], "apply_discount");
        assert_eq!(json["discount"]["kind"], "percentage");

        let back: OrderCommand = serde_json::from_value(json).unwrap();
        assert_eq!(back, command);
    }
}
