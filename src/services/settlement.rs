use crate::{
    entities::{
        order::{self, Entity as Order},
        order_line,
        product_variant::{self, Entity as ProductVariant},
    },
    errors::ServiceError,
    payments::PaymentInfo,
    services::notifications::{Notifier, OrderConfirmation},
};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbBackend, EntityTrait, QueryFilter, QuerySelect, Set, SqlErr, TransactionTrait,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

const ORDER_STATUS_COMPLETED: &str = "Completado";
const PAYMENT_STATUS_APPROVED: &str = "Aprobado";
const PAYMENT_METHOD_LABEL: &str = "MercadoPago";

/// Terminal result of processing one approved-payment event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Order and lines written, stock decremented.
    Committed { order_id: i32 },
    /// An order for this payment id already exists; nothing was written.
    AlreadySettled,
    /// Payment is not in an approved state; nothing was written.
    NotApproved { status: String },
}

/// One normalized purchase line extracted from the gateway's payment
/// details.
#[derive(Debug, Clone)]
struct SettlementLine {
    variant_id: i32,
    quantity: i32,
    unit_price: Decimal,
}

enum CommitAttempt {
    Committed(order::Model),
    /// The unique constraint on payment_id fired: a concurrent delivery
    /// settled this payment first.
    DuplicatePayment,
}

/// Records a paid order and adjusts inventory, exactly once per gateway
/// payment id. All writes happen inside a single transaction; any failure
/// rolls the whole settlement back.
#[derive(Clone)]
pub struct SettlementEngine {
    db: Arc<DatabaseConnection>,
    notifier: Arc<dyn Notifier>,
}

impl SettlementEngine {
    pub fn new(db: Arc<DatabaseConnection>, notifier: Arc<dyn Notifier>) -> Self {
        Self { db, notifier }
    }

    /// Settles one payment event. The caller must already have verified the
    /// event's origin; `payment` must come from the gateway's payment API,
    /// never from the webhook body.
    #[instrument(skip(self, payment), fields(payment_id = %payment.id, status = %payment.status))]
    pub async fn settle(&self, payment: &PaymentInfo) -> Result<SettlementOutcome, ServiceError> {
        if !payment.is_approved() {
            info!("payment not approved, taking no action");
            return Ok(SettlementOutcome::NotApproved {
                status: payment.status.clone(),
            });
        }

        // Fast-path dedup. The unique constraint below remains the
        // authoritative guard when two deliveries race past this check.
        let existing = Order::find()
            .filter(order::Column::PaymentId.eq(payment.id.as_str()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            info!("payment already settled, acknowledging without action");
            return Ok(SettlementOutcome::AlreadySettled);
        }

        let lines = Self::extract_lines(payment)?;

        let txn = self.db.begin().await?;
        match self.try_commit(&txn, payment, &lines).await {
            Ok(CommitAttempt::Committed(order)) => {
                txn.commit().await?;
                info!(order_id = order.id, "order settled and stock updated");
                self.dispatch_confirmation(&order, payment);
                Ok(SettlementOutcome::Committed { order_id: order.id })
            }
            Ok(CommitAttempt::DuplicatePayment) => {
                if let Err(e) = txn.rollback().await {
                    warn!(error = %e, "rollback after duplicate payment insert failed");
                }
                info!("concurrent delivery already settled this payment");
                Ok(SettlementOutcome::AlreadySettled)
            }
            Err(e) => {
                if let Err(rb) = txn.rollback().await {
                    warn!(error = %rb, "settlement rollback failed");
                }
                error!(error = %e, "settlement aborted, no partial state persisted");
                Err(e)
            }
        }
    }

    /// All storage writes for one settlement. Runs inside the caller's
    /// transaction; returning an error causes a full rollback.
    async fn try_commit(
        &self,
        txn: &DatabaseTransaction,
        payment: &PaymentInfo,
        lines: &[SettlementLine],
    ) -> Result<CommitAttempt, ServiceError> {
        let buyer_ref = payment
            .external_reference
            .clone()
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| {
                ServiceError::BadRequest("payment carries no buyer reference".to_string())
            })?;

        // The gateway-reported amount is what was actually charged; a
        // mismatch with the line sum is logged for reconciliation.
        let line_sum: Decimal = lines
            .iter()
            .map(|l| l.unit_price * Decimal::from(l.quantity))
            .sum();
        if line_sum != payment.transaction_amount {
            warn!(
                %line_sum,
                transaction_amount = %payment.transaction_amount,
                "line-item sum differs from gateway amount"
            );
        }

        let order = order::ActiveModel {
            buyer_ref: Set(buyer_ref),
            total_amount: Set(payment.transaction_amount),
            status: Set(Some(ORDER_STATUS_COMPLETED.to_string())),
            payment_status: Set(Some(PAYMENT_STATUS_APPROVED.to_string())),
            payment_method: Set(Some(PAYMENT_METHOD_LABEL.to_string())),
            payment_id: Set(Some(payment.id.clone())),
            ..Default::default()
        };

        let order = match order.insert(txn).await {
            Ok(order) => order,
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                return Ok(CommitAttempt::DuplicatePayment);
            }
            Err(e) => return Err(e.into()),
        };

        // Decrement stock per distinct variant before writing any lines, so
        // an unknown variant surfaces as NotFound rather than a foreign-key
        // failure. Rows are locked in ascending variant-id order so
        // overlapping settlements cannot deadlock.
        let mut totals: BTreeMap<i32, i32> = BTreeMap::new();
        for line in lines {
            *totals.entry(line.variant_id).or_insert(0) += line.quantity;
        }

        for (variant_id, quantity) in totals {
            self.decrement_stock(txn, variant_id, quantity).await?;
        }

        for line in lines {
            order_line::ActiveModel {
                order_id: Set(order.id),
                variant_id: Set(line.variant_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                ..Default::default()
            }
            .insert(txn)
            .await?;
        }

        Ok(CommitAttempt::Committed(order))
    }

    async fn decrement_stock(
        &self,
        txn: &DatabaseTransaction,
        variant_id: i32,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let mut query = ProductVariant::find_by_id(variant_id);
        // SQLite rejects FOR UPDATE and serializes writers on its own;
        // the explicit row lock only applies on Postgres.
        if txn.get_database_backend() == DbBackend::Postgres {
            query = query.lock_exclusive();
        }

        let variant = query
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("variant {variant_id} not found")))?;

        if variant.stock_quantity < quantity {
            return Err(ServiceError::InsufficientStock {
                variant_id,
                available: variant.stock_quantity,
                requested: quantity,
            });
        }

        let new_stock = variant.stock_quantity - quantity;
        let mut active: product_variant::ActiveModel = variant.into();
        active.stock_quantity = Set(new_stock);
        active.update(txn).await?;

        Ok(())
    }

    /// Normalizes and validates the gateway's item list before any storage
    /// write happens.
    fn extract_lines(payment: &PaymentInfo) -> Result<Vec<SettlementLine>, ServiceError> {
        let items = payment.items();
        if items.is_empty() {
            return Err(ServiceError::BadRequest(
                "approved payment carries no line items".to_string(),
            ));
        }

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let variant_id: i32 = item.id.parse().map_err(|_| {
                ServiceError::BadRequest(format!("item id {:?} is not a variant id", item.id))
            })?;
            let quantity = i32::try_from(item.quantity)
                .ok()
                .filter(|q| *q > 0)
                .ok_or_else(|| {
                    ServiceError::BadRequest(format!(
                        "item {variant_id} has non-positive quantity {}",
                        item.quantity
                    ))
                })?;
            lines.push(SettlementLine {
                variant_id,
                quantity,
                unit_price: item.unit_price,
            });
        }

        lines.sort_by_key(|l| l.variant_id);
        Ok(lines)
    }

    /// Best-effort, outside the transaction. A failed send is logged and
    /// never affects the committed settlement.
    fn dispatch_confirmation(&self, order: &order::Model, payment: &PaymentInfo) {
        let confirmation = OrderConfirmation {
            order_id: order.id,
            recipient: payment.payer_email().map(str::to_string),
            total_amount: order.total_amount,
        };
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.send_order_confirmation(&confirmation).await {
                warn!(order_id = confirmation.order_id, error = %e, "confirmation email failed");
            }
        });
    }
}
