//! REST implementation of [`CartGateway`].

use std::sync::Arc;

use async_trait::async_trait;
use marketstall_core::{CartIdentity, CartItem, CartToken, CurrencyCode, ProductId};
use reqwest::{Method, StatusCode};
use tracing::instrument;

use super::wire::{CartResponse, LineMutationRequest, MergeRequest, WireLine};
use super::{CartGateway, GatewayError, OperationToken, RemoteCart};
use crate::api::{ApiClient, ApiFailure};
use crate::config::StorefrontConfig;

/// Cart gateway backed by the store's REST API.
///
/// Transport failures are retried up to `max_retries` times with the same
/// `Idempotency-Key`, so a retried mutation is applied at most once.
#[derive(Clone)]
pub struct RestCartGateway {
    inner: Arc<RestCartGatewayInner>,
}

struct RestCartGatewayInner {
    api: ApiClient,
    currency: CurrencyCode,
}

/// What a request is about, for error mapping.
struct CallContext<'a> {
    cart: Option<&'a CartToken>,
    product: Option<ProductId>,
}

impl RestCartGateway {
    /// Create a gateway from configuration.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unreachable` if the HTTP client cannot be built.
    pub fn new(config: &StorefrontConfig) -> Result<Self, GatewayError> {
        let api = ApiClient::new(config)?;
        Ok(Self {
            inner: Arc::new(RestCartGatewayInner {
                api,
                currency: config.currency,
            }),
        })
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        op: Option<OperationToken>,
        context: &CallContext<'_>,
    ) -> Result<CartResponse, GatewayError> {
        let url = self
            .inner
            .api
            .endpoint(path, &[])
            .map_err(|e| map_failure(e, context))?;

        self.inner
            .api
            .send_with_retry::<CartResponse>(method, url, body.as_ref(), op)
            .await
            .map_err(|failure| map_failure(failure, context))
    }

    async fn mutate_lines(
        &self,
        method: Method,
        identity: &CartIdentity,
        product_id: ProductId,
        quantity: u32,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError> {
        let token = &identity.cart_id;
        let body = serde_json::to_value(LineMutationRequest {
            cart_id: token.as_str(),
            items: vec![WireLine {
                product_id,
                quantity,
            }],
        })?;
        let context = CallContext {
            cart: Some(token),
            product: Some(product_id),
        };

        let response = self
            .execute(
                method,
                &format!("carts/{token}/items/"),
                Some(body),
                Some(op),
                &context,
            )
            .await?;
        Ok(response.into_items(self.inner.currency))
    }
}

#[async_trait]
impl CartGateway for RestCartGateway {
    #[instrument(skip(self), fields(cart_id = persisted.map(|i| i.cart_id.as_str())))]
    async fn fetch_or_create(
        &self,
        persisted: Option<&CartIdentity>,
    ) -> Result<RemoteCart, GatewayError> {
        let Some(identity) = persisted else {
            let response = self
                .execute(
                    Method::POST,
                    "carts/",
                    Some(serde_json::json!({})),
                    Some(OperationToken::new()),
                    &CallContext {
                        cart: None,
                        product: None,
                    },
                )
                .await?;
            return Ok(response.into_remote_cart(self.inner.currency));
        };

        let response = self
            .execute(
                Method::GET,
                &format!("carts/{}/", identity.cart_id),
                None,
                None,
                &CallContext {
                    cart: Some(&identity.cart_id),
                    product: None,
                },
            )
            .await?;

        // The caller's binding wins; the server may omit the owner on reads.
        Ok(RemoteCart {
            identity: identity.clone(),
            items: response.into_items(self.inner.currency),
        })
    }

    #[instrument(skip(self, identity), fields(cart_id = %identity.cart_id, op = %op))]
    async fn add_item(
        &self,
        identity: &CartIdentity,
        product_id: ProductId,
        quantity: u32,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError> {
        self.mutate_lines(Method::POST, identity, product_id, quantity, op)
            .await
    }

    #[instrument(skip(self, identity), fields(cart_id = %identity.cart_id, op = %op))]
    async fn remove_item(
        &self,
        identity: &CartIdentity,
        product_id: ProductId,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError> {
        let token = &identity.cart_id;
        let response = self
            .execute(
                Method::DELETE,
                &format!("carts/{token}/items/{product_id}/"),
                None,
                Some(op),
                &CallContext {
                    cart: Some(token),
                    product: Some(product_id),
                },
            )
            .await?;
        Ok(response.into_items(self.inner.currency))
    }

    #[instrument(skip(self, identity), fields(cart_id = %identity.cart_id, op = %op))]
    async fn update_quantity(
        &self,
        identity: &CartIdentity,
        product_id: ProductId,
        quantity: u32,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError> {
        if quantity == 0 {
            return self.remove_item(identity, product_id, op).await;
        }
        self.mutate_lines(Method::PATCH, identity, product_id, quantity, op)
            .await
    }

    #[instrument(
        skip(self, guest, user),
        fields(guest_cart = %guest.cart_id, user_cart = %user.cart_id, op = %op)
    )]
    async fn merge_carts(
        &self,
        guest: &CartIdentity,
        user: &CartIdentity,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError> {
        let body = serde_json::to_value(MergeRequest {
            guest_cart_id: guest.cart_id.as_str(),
            user_cart_id: user.cart_id.as_str(),
        })?;
        let response = self
            .execute(
                Method::POST,
                "carts/merge/",
                Some(body),
                Some(op),
                &CallContext {
                    cart: Some(&guest.cart_id),
                    product: None,
                },
            )
            .await?;
        Ok(response.into_items(self.inner.currency))
    }

    #[instrument(skip(self, identity), fields(cart_id = %identity.cart_id, op = %op))]
    async fn clear(
        &self,
        identity: &CartIdentity,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError> {
        let token = &identity.cart_id;
        let response = self
            .execute(
                Method::DELETE,
                &format!("carts/{token}/items/"),
                None,
                Some(op),
                &CallContext {
                    cart: Some(token),
                    product: None,
                },
            )
            .await?;
        Ok(response.into_items(self.inner.currency))
    }
}

/// Translate a raw request failure into a gateway error kind.
fn map_failure(failure: ApiFailure, context: &CallContext<'_>) -> GatewayError {
    if failure.is_unavailable() {
        return GatewayError::Unreachable(failure.message());
    }

    match failure {
        ApiFailure::Status { status, body } => match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => match context.cart {
                Some(token) => GatewayError::InvalidIdentity(token.clone()),
                None => GatewayError::Rejected(
                    body.message.unwrap_or_else(|| format!("HTTP {status}")),
                ),
            },
            StatusCode::CONFLICT if body.code.as_deref() == Some("out_of_stock") => {
                match body.product_id.or(context.product) {
                    Some(product_id) => GatewayError::OutOfStock {
                        product_id,
                        available: body.available.unwrap_or(0),
                    },
                    None => GatewayError::Rejected(
                        body.message
                            .unwrap_or_else(|| "out of stock".to_string()),
                    ),
                }
            }
            s if s.is_client_error() => GatewayError::Rejected(
                body.message.unwrap_or_else(|| format!("HTTP {status}")),
            ),
            s => GatewayError::Protocol(format!("unexpected status {s}")),
        },
        ApiFailure::Decode(msg) | ApiFailure::InvalidPath(msg) => GatewayError::Protocol(msg),
        ApiFailure::Transport(msg) => GatewayError::Unreachable(msg),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::api::ErrorBody;

    use super::*;

    fn status(code: u16, body: ErrorBody) -> ApiFailure {
        ApiFailure::Status {
            status: StatusCode::from_u16(code).unwrap(),
            body,
        }
    }

    fn cart_context(token: &CartToken) -> CallContext<'_> {
        CallContext {
            cart: Some(token),
            product: Some(ProductId::new(5)),
        }
    }

    #[test]
    fn test_missing_cart_is_invalid_identity() {
        let token = CartToken::new("stale");
        for code in [404, 410] {
            let err = map_failure(status(code, ErrorBody::default()), &cart_context(&token));
            assert_eq!(err, GatewayError::InvalidIdentity(token.clone()));
        }
    }

    #[test]
    fn test_out_of_stock_falls_back_to_requested_product() {
        let token = CartToken::new("c");
        let body = ErrorBody {
            code: Some("out_of_stock".to_string()),
            available: Some(1),
            ..ErrorBody::default()
        };
        let err = map_failure(status(409, body), &cart_context(&token));
        assert_eq!(
            err,
            GatewayError::OutOfStock {
                product_id: ProductId::new(5),
                available: 1
            }
        );
    }

    #[test]
    fn test_other_client_errors_are_rejected() {
        let token = CartToken::new("c");
        let body = ErrorBody {
            message: Some("quantity too large".to_string()),
            ..ErrorBody::default()
        };
        let err = map_failure(status(422, body), &cart_context(&token));
        assert_eq!(err, GatewayError::Rejected("quantity too large".to_string()));
    }

    #[test]
    fn test_outages_are_unreachable() {
        let token = CartToken::new("c");
        for code in [429, 500, 502, 503] {
            let err = map_failure(status(code, ErrorBody::default()), &cart_context(&token));
            assert!(matches!(err, GatewayError::Unreachable(_)), "{code}");
        }
    }
}
