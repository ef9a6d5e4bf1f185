//! Stock ledger: reservation at checkout and restoration on cancel/return.
//!
//! Both operations take a connection so they run inside the caller's
//! transaction. Reservation uses a guarded decrement
//! (`stock = stock - q WHERE stock >= q`) and never oversells.

use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    entities::{order_item, product},
    errors::ServiceError,
    services::cart::PricedLine,
};

fn insufficient(name: &str, available: i32) -> ServiceError {
    ServiceError::InsufficientStock(format!(
        "Insufficient stock for {}. Available: {}",
        name, available
    ))
}

/// Decrements stock for every line or fails with `InsufficientStock`.
/// On error the caller must roll back; earlier decrements in the same
/// transaction are not undone here.
pub async fn reserve<C: ConnectionTrait>(conn: &C, lines: &[PricedLine]) -> Result<(), ServiceError> {
    for line in lines {
        let qty = line.quantity;
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(qty),
            )
            .filter(product::Column::Id.eq(line.product.id))
            .filter(product::Column::Stock.gte(qty))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            // Report what is on the shelf now, which may differ from the snapshot
            let available = product::Entity::find_by_id(line.product.id)
                .one(conn)
                .await?
                .map(|p| p.stock)
                .unwrap_or(0);
            warn!(
                product_id = %line.product.id,
                requested = qty,
                available,
                "Stock reservation failed"
            );
            return Err(insufficient(&line.product.name, available));
        }

        debug!(product_id = %line.product.id, quantity = qty, "Stock reserved");
    }
    Ok(())
}

/// Checks availability against the loaded snapshot before any write.
pub fn check_available(lines: &[PricedLine]) -> Result<(), ServiceError> {
    // Lines for the same product draw from one shelf
    let mut needed: Vec<(Uuid, i32, &PricedLine)> = Vec::new();
    for line in lines {
        match needed.iter_mut().find(|(id, _, _)| *id == line.product.id) {
            Some(entry) => entry.1 += line.quantity,
            None => needed.push((line.product.id, line.quantity, line)),
        }
    }
    for (_, qty, line) in needed {
        if line.product.stock < qty {
            return Err(insufficient(&line.product.name, line.product.stock));
        }
    }
    Ok(())
}

/// Puts each line's quantity back. Not idempotent: callers guarantee it runs
/// once per order.
pub async fn restore<C: ConnectionTrait>(
    conn: &C,
    items: &[order_item::Model],
) -> Result<(), ServiceError> {
    for item in items {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(item.quantity),
            )
            .filter(product::Column::Id.eq(item.product_id))
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            warn!(product_id = %item.product_id, "Product no longer exists, stock not restored");
        }
    }
    Ok(())
}
