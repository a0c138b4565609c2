use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        confirmation_token::{self, Entity as TokenEntity},
        delivery_report::{self, Entity as ReportEntity},
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// How the requester proved who they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Logged-in buyer session.
    Session,
    /// Single-use link token from the delivery notification.
    Token,
}

/// The credential presented with a confirmation request.
#[derive(Debug, Clone)]
pub enum Requester {
    Session { user_id: Uuid },
    Token { token: String },
}

/// Terminal classification of a confirmation or report attempt. Every
/// variant maps to a distinct, user-presentable outcome; retries and
/// double-submits land on the `Already*` variants instead of erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    /// The order is awaiting the buyer's decision.
    Ready,
    /// This request completed the order.
    Success,
    /// The order was already confirmed, by this or an earlier request.
    AlreadyDone,
    /// A non-delivery report is already on file.
    AlreadyReported,
    /// The credential does not grant access to this order.
    Unauthorized,
}

/// Minimal order details shown on the confirmation page. Only populated for
/// an authorized requester.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfirmationOrderSummary {
    pub order_number: String,
    pub product_name: String,
    pub quantity: i32,
    pub total_amount: rust_decimal::Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfirmationView {
    pub status: ConfirmationStatus,
    pub auth_method: Option<AuthMethod>,
    /// Absent when the requester is not authorized; order contents are never
    /// disclosed to an unproven caller.
    pub order: Option<ConfirmationOrderSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfirmationResult {
    pub status: ConfirmationStatus,
    pub auth_method: Option<AuthMethod>,
}

/// Handles the buyer's receipt decision on a `delivered_pending` order.
///
/// Two independent entry points (session and link token) can act on the same
/// order concurrently; the completing transition is a single conditional
/// update so exactly one request wins and the rest classify as
/// `already_done`.
#[derive(Clone)]
pub struct DeliveryConfirmationService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl DeliveryConfirmationService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send confirmation event");
            }
        }
    }

    /// Shows the confirmation page state for an order.
    #[instrument(skip(self, requester), fields(order_id = %order_id))]
    pub async fn view(
        &self,
        order_id: Uuid,
        requester: Requester,
    ) -> Result<ConfirmationView, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let auth_method = match self.authorize(&order, &requester).await? {
            Some(method) => method,
            None => {
                return Ok(ConfirmationView {
                    status: ConfirmationStatus::Unauthorized,
                    auth_method: None,
                    order: None,
                })
            }
        };

        let status = self.classify(&order).await?;
        Ok(ConfirmationView {
            status,
            auth_method: Some(auth_method),
            order: Some(ConfirmationOrderSummary {
                order_number: order.order_number,
                product_name: order.product_name,
                quantity: order.quantity,
                total_amount: order.total_amount,
            }),
        })
    }

    /// Confirms receipt: `delivered_pending → completed`.
    #[instrument(skip(self, requester), fields(order_id = %order_id))]
    pub async fn confirm(
        &self,
        order_id: Uuid,
        requester: Requester,
    ) -> Result<ConfirmationResult, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let auth_method = match self.authorize(&order, &requester).await? {
            Some(method) => method,
            None => {
                return Ok(ConfirmationResult {
                    status: ConfirmationStatus::Unauthorized,
                    auth_method: None,
                })
            }
        };

        if self.has_open_report(order_id).await? {
            return Ok(ConfirmationResult {
                status: ConfirmationStatus::AlreadyReported,
                auth_method: Some(auth_method),
            });
        }

        // Exactly one concurrent request can take this row out of
        // delivered_pending.
        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Completed))
            .col_expr(
                order::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::DeliveredPending))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            let status = self.classify_settled(order_id).await?;
            return Ok(ConfirmationResult {
                status,
                auth_method: Some(auth_method),
            });
        }

        self.spend_token(&requester).await?;

        info!(order_id = %order_id, auth_method = ?auth_method, "delivery confirmed");
        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status: OrderStatus::DeliveredPending,
            new_status: OrderStatus::Completed,
        })
        .await;
        self.emit(Event::DeliveryConfirmed(order_id)).await;

        Ok(ConfirmationResult {
            status: ConfirmationStatus::Success,
            auth_method: Some(auth_method),
        })
    }

    /// Files a non-delivery report. The order stays in `delivered_pending`
    /// with the dispute flagged; an operator resolves it by re-delivering or
    /// cancelling.
    #[instrument(skip(self, requester, description), fields(order_id = %order_id))]
    pub async fn report_not_delivered(
        &self,
        order_id: Uuid,
        requester: Requester,
        description: String,
    ) -> Result<ConfirmationResult, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let auth_method = match self.authorize(&order, &requester).await? {
            Some(method) => method,
            None => {
                return Ok(ConfirmationResult {
                    status: ConfirmationStatus::Unauthorized,
                    auth_method: None,
                })
            }
        };

        if order.status != OrderStatus::DeliveredPending {
            let status = self.classify(&order).await?;
            return Ok(ConfirmationResult {
                status,
                auth_method: Some(auth_method),
            });
        }

        let reported_by = match &requester {
            Requester::Session { user_id } => Some(*user_id),
            Requester::Token { .. } => None,
        };

        let active = delivery_report::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            description: Set(Some(description)),
            reported_by: Set(reported_by),
            via_token: Set(matches!(requester, Requester::Token { .. })),
            created_at: Set(Utc::now()),
        };

        // The unique index on order_id makes the first report win.
        match active.insert(&*self.db).await {
            Ok(_) => {}
            Err(e) => {
                if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                    return Ok(ConfirmationResult {
                        status: ConfirmationStatus::AlreadyReported,
                        auth_method: Some(auth_method),
                    });
                }
                return Err(ServiceError::from(e));
            }
        }

        self.spend_token(&requester).await?;

        info!(order_id = %order_id, auth_method = ?auth_method, "non-delivery reported");
        self.emit(Event::DeliveryReported(order_id)).await;

        Ok(ConfirmationResult {
            status: ConfirmationStatus::Success,
            auth_method: Some(auth_method),
        })
    }

    /// Maps a credential to an auth method, or `None` when it proves
    /// nothing about this order.
    ///
    /// A spent token still identifies the bearer who settled the order, so
    /// a reused link reads back `already_done`/`already_reported` rather
    /// than being treated as a stranger. It stops proving anything once the
    /// order is confirmable again after a redeliver cycle; only the fresh
    /// token issued for the new delivery can act then.
    async fn authorize(
        &self,
        order: &OrderModel,
        requester: &Requester,
    ) -> Result<Option<AuthMethod>, ServiceError> {
        match requester {
            Requester::Session { user_id } => {
                if *user_id == order.buyer_id {
                    Ok(Some(AuthMethod::Session))
                } else {
                    Ok(None)
                }
            }
            Requester::Token { token } => {
                let found = TokenEntity::find()
                    .filter(confirmation_token::Column::Token.eq(token.as_str()))
                    .filter(confirmation_token::Column::OrderId.eq(order.id))
                    .one(&*self.db)
                    .await?;
                let Some(row) = found else {
                    return Ok(None);
                };
                if !row.is_spent() {
                    return Ok(Some(AuthMethod::Token));
                }
                if order.status == OrderStatus::Completed
                    || self.has_open_report(order.id).await?
                {
                    Ok(Some(AuthMethod::Token))
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn classify(&self, order: &OrderModel) -> Result<ConfirmationStatus, ServiceError> {
        if order.status == OrderStatus::Completed {
            return Ok(ConfirmationStatus::AlreadyDone);
        }
        if self.has_open_report(order.id).await? {
            return Ok(ConfirmationStatus::AlreadyReported);
        }
        if order.status == OrderStatus::DeliveredPending {
            return Ok(ConfirmationStatus::Ready);
        }
        Err(ServiceError::InvalidTransition {
            current: order.status.to_string(),
            requested: "confirm delivery".to_string(),
        })
    }

    /// Re-reads after losing the conditional update to name the winner.
    async fn classify_settled(&self, order_id: Uuid) -> Result<ConfirmationStatus, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        self.classify(&order).await
    }

    async fn has_open_report(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let count = ReportEntity::find()
            .filter(delivery_report::Column::OrderId.eq(order_id))
            .count(&*self.db)
            .await?;
        Ok(count > 0)
    }

    /// Marks a link token used. Conditional on `used_at` still being null so
    /// a raced spend cannot reset the timestamp.
    async fn spend_token(&self, requester: &Requester) -> Result<(), ServiceError> {
        if let Requester::Token { token } = requester {
            TokenEntity::update_many()
                .col_expr(
                    confirmation_token::Column::UsedAt,
                    Expr::value(Some(Utc::now())),
                )
                .filter(confirmation_token::Column::Token.eq(token.as_str()))
                .filter(confirmation_token::Column::UsedAt.is_null())
                .exec(&*self.db)
                .await?;
        }
        Ok(())
    }
}
