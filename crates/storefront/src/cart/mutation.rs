//! Local cart mutations.

use marketstall_core::{CartItem, Price, ProductId, ProductSnapshot};

/// A cart change, applied optimistically to the local mirror and replayed
/// on rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartMutation {
    Add {
        product: ProductSnapshot,
        unit_price: Price,
        quantity: u32,
    },
    Remove {
        product_id: ProductId,
    },
    SetQuantity {
        product_id: ProductId,
        quantity: u32,
    },
}

impl CartMutation {
    #[must_use]
    pub const fn product_id(&self) -> ProductId {
        match self {
            Self::Add { product, .. } => product.id,
            Self::Remove { product_id } | Self::SetQuantity { product_id, .. } => *product_id,
        }
    }

    /// Units the caller asked for; 0 for removals.
    #[must_use]
    pub const fn requested_quantity(&self) -> u32 {
        match self {
            Self::Add { quantity, .. } | Self::SetQuantity { quantity, .. } => *quantity,
            Self::Remove { .. } => 0,
        }
    }

    /// Apply to a normalized item list, keeping it normalized.
    pub fn apply(&self, items: &mut Vec<CartItem>) {
        match self {
            Self::Add {
                product,
                unit_price,
                quantity,
            } => {
                if let Some(line) = items.iter_mut().find(|line| line.product_id == product.id) {
                    line.quantity = line.quantity.saturating_add(*quantity);
                } else if *quantity > 0 {
                    items.push(CartItem {
                        product_id: product.id,
                        quantity: *quantity,
                        unit_price: *unit_price,
                        product: product.clone(),
                    });
                }
            }
            Self::Remove { product_id } => items.retain(|line| line.product_id != *product_id),
            Self::SetQuantity {
                product_id,
                quantity: 0,
            } => items.retain(|line| line.product_id != *product_id),
            Self::SetQuantity {
                product_id,
                quantity,
            } => {
                if let Some(line) = items.iter_mut().find(|line| line.product_id == *product_id) {
                    line.quantity = *quantity;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use marketstall_core::CurrencyCode;

    use super::*;

    fn add(id: i32, quantity: u32) -> CartMutation {
        CartMutation::Add {
            product: ProductSnapshot {
                id: ProductId::new(id),
                title: format!("Product {id}"),
                image: None,
            },
            unit_price: Price::from_cents(500, CurrencyCode::USD),
            quantity,
        }
    }

    #[test]
    fn test_add_increments_existing_line() {
        let mut items = Vec::new();
        add(1, 2).apply(&mut items);
        add(1, 3).apply(&mut items);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 5);
    }

    #[test]
    fn test_set_zero_removes_line() {
        let mut items = Vec::new();
        add(1, 1).apply(&mut items);
        add(2, 1).apply(&mut items);
        CartMutation::SetQuantity {
            product_id: ProductId::new(1),
            quantity: 0,
        }
        .apply(&mut items);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_id, ProductId::new(2));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut items = Vec::new();
        add(1, 1).apply(&mut items);
        CartMutation::Remove {
            product_id: ProductId::new(9),
        }
        .apply(&mut items);
        assert_eq!(items.len(), 1);
    }
}
