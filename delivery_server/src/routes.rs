//! Request handler definitions
//!
//! Define each route and its handler here.
//! Handlers that are more than a line or two MUST go into a separate module (see [`crate::ws`]). Keep this module neat
//! and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Every handler here is async and only awaits the engine, which in
//! turn only awaits storage and the task queue. Anything slow (notifications, payment-triggered transitions) is a job.
use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use delivery_engine::{
    db_types::{Actor, OrderId, OrderStatusType, PaymentId, RestaurantId, Role},
    gateway::PaymentProvider,
    order_objects::{NewOrderRequest, OrderListParams},
    queue::DeadLetterQueue,
    DeliveryDatabase,
    OrderFlowApi,
    PaymentFlowApi,
    PaymentFlowError,
};
use log::*;
use serde_json::json;
use stripe_tools::SIGNATURE_HEADER;

use crate::{
    data_objects::{
        AssignParams,
        CancelParams,
        JobAccepted,
        LimitParams,
        PaymentIntentParams,
        RefundParams,
        StatusChangeParams,
    },
    errors::ServerError,
    identity::Identity,
    ws::websocket,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal requires [$($roles:expr),+]) => {
        paste::paste! { pub struct [<$name:camel Route>];}
        paste::paste! {
                impl [<$name:camel Route>] {
                #[allow(clippy::new_without_default)]
                pub fn new() -> Self { Self }
            }
        }
        paste::paste! {
            impl actix_web::dev::HttpServiceFactory for [<$name:camel Route>] {
                fn register(self, config: &mut actix_web::dev::AppService) {
                    let res = actix_web::Resource::new($path)
                        .name(stringify!($name))
                        .guard(actix_web::guard::$method())
                        .to($name)
                        .wrap($crate::middleware::AclMiddlewareFactory::new(&[$($roles),+]));
                    actix_web::dev::HttpServiceFactory::register(res, config);
                }
            }
        }
    };

    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };

    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+ where requires [$($roles:expr),+])  => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>)
                    .wrap($crate::middleware::AclMiddlewareFactory::new(&[$($roles),+]));
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Orders  ----------------------------------------------------
route!(place_order => Post "/orders" impl DeliveryDatabase where requires [Role::Customer]);
/// Route handler for placing an order
///
/// Prices come from the menu, never from the request. The new order is `PENDING` and is returned with its totals.
pub async fn place_order<B: DeliveryDatabase>(
    identity: Identity,
    body: web::Json<NewOrderRequest>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    debug!("💻️ POST order for {}", identity.user_id);
    let order = api.place_order(identity.user_id, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(order))
}

route!(my_orders => Get "/orders" impl DeliveryDatabase where requires [Role::Customer]);
/// Route handler for the caller's order history, newest first.
///
/// Accepts `status`, `limit` (default 20, at most 100) and `offset` in the query string.
pub async fn my_orders<B: DeliveryDatabase>(
    identity: Identity,
    params: web::Query<OrderListParams>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    debug!("💻️ GET orders for {}", identity.user_id);
    let orders = api.list_customer_orders(identity.user_id, params.into_inner()).await?;
    Ok(HttpResponse::Ok().json(orders))
}

route!(restaurant_orders => Get "/restaurants/{id}/orders" impl DeliveryDatabase where requires [Role::RestaurantOwner, Role::Admin]);
/// Route handler for a restaurant's incoming orders. Accepts `status`, `limit` (default 50, at most 100) and `offset`.
pub async fn restaurant_orders<B: DeliveryDatabase>(
    identity: Identity,
    path: web::Path<i64>,
    params: web::Query<OrderListParams>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let restaurant_id = RestaurantId(path.into_inner());
    debug!("💻️ GET orders of {restaurant_id} for {} {}", identity.role, identity.user_id);
    let orders = api.list_restaurant_orders(identity.actor(), restaurant_id, params.into_inner()).await?;
    Ok(HttpResponse::Ok().json(orders))
}

route!(available_deliveries => Get "/deliveries/available" impl DeliveryDatabase where requires [Role::DeliveryPartner, Role::Admin]);
/// Route handler listing orders that are ready for pickup and have no courier yet, oldest first.
pub async fn available_deliveries<B: DeliveryDatabase>(
    identity: Identity,
    params: web::Query<LimitParams>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    trace!("💻️ GET available deliveries for {}", identity.user_id);
    let orders = api.list_available_deliveries(params.into_inner().limit).await?;
    Ok(HttpResponse::Ok().json(orders))
}

route!(order_by_id => Get "/orders/{id}" impl DeliveryDatabase);
/// Route handler for fetching a single order with its line items.
///
/// Visible to the customer who placed it, the restaurant's owner, the assigned delivery partner and admins.
pub async fn order_by_id<B: DeliveryDatabase>(
    identity: Identity,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId(path.into_inner());
    debug!("💻️ GET {order_id} for {} {}", identity.role, identity.user_id);
    let details = api.fetch_order_details(order_id).await?;
    if !api.can_view(&identity.actor(), &details.order).await? {
        return Err(ServerError::InsufficientPermissions(format!("{order_id} belongs to someone else")));
    }
    Ok(HttpResponse::Ok().json(details))
}

route!(update_order_status => Post "/orders/{id}/status" impl DeliveryDatabase);
/// Route handler for requesting an order status change
///
/// The request is checked against the transition graph and the caller's role straight away, so an illegal request
/// fails here. A legal one is queued and the response is `202 Accepted`. The write happens in a worker, which checks
/// everything again against the order as it is then.
pub async fn update_order_status<B: DeliveryDatabase>(
    identity: Identity,
    path: web::Path<i64>,
    body: web::Json<StatusChangeParams>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId(path.into_inner());
    let StatusChangeParams { status, reason } = body.into_inner();
    debug!("💻️ POST status {status} for {order_id} by {} {}", identity.role, identity.user_id);
    let job_id = api.request_transition(order_id, identity.actor(), status, reason).await?;
    Ok(HttpResponse::Accepted().json(JobAccepted { job_id, message: format!("{order_id} will move to {status}") }))
}

route!(cancel_order => Post "/orders/{id}/cancel" impl DeliveryDatabase where requires [Role::Customer, Role::Admin]);
/// Route handler for cancelling an order. Unlike the status endpoint, this runs the transition before replying.
pub async fn cancel_order<B: DeliveryDatabase>(
    identity: Identity,
    path: web::Path<i64>,
    body: Option<web::Json<CancelParams>>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId(path.into_inner());
    let reason = body.and_then(|b| b.into_inner().reason);
    debug!("💻️ POST cancel {order_id} by {} {}", identity.role, identity.user_id);
    let order = api.transition(order_id, identity.actor(), OrderStatusType::Cancelled, reason).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(assign_order => Post "/orders/{id}/assign" impl DeliveryDatabase where requires [Role::DeliveryPartner, Role::Admin]);
/// Route handler for claiming an order for delivery.
///
/// A delivery partner always claims for themselves. An admin must name the partner in `delivery_partner_id`.
pub async fn assign_order<B: DeliveryDatabase>(
    identity: Identity,
    path: web::Path<i64>,
    body: Option<web::Json<AssignParams>>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = OrderId(path.into_inner());
    let partner_id = match identity.actor() {
        Actor::Admin(_) => body.and_then(|b| b.into_inner().delivery_partner_id).ok_or_else(|| {
            ServerError::InvalidRequestBody("delivery_partner_id is required when an admin assigns an order".into())
        })?,
        _ => identity.user_id,
    };
    debug!("💻️ POST assign {order_id} to {partner_id}");
    let order = api.assign_delivery_partner(order_id, partner_id).await?;
    Ok(HttpResponse::Ok().json(order))
}

//----------------------------------------------   Payments  ----------------------------------------------------
route!(create_payment_intent => Post "/payments/intent" impl DeliveryDatabase, PaymentProvider where requires [Role::Customer]);
/// Route handler for opening a payment for one of the caller's `PENDING` orders.
///
/// The response carries the provider's client secret, which the client uses to complete the payment directly with the
/// provider. The outcome reaches this server later, by webhook or by polling.
pub async fn create_payment_intent<B: DeliveryDatabase, P: PaymentProvider>(
    identity: Identity,
    body: web::Json<PaymentIntentParams>,
    api: web::Data<PaymentFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let PaymentIntentParams { order_id, payment_method } = body.into_inner();
    debug!("💻️ POST payment intent for {order_id} ({payment_method}) by {}", identity.user_id);
    let intent = api.create_intent(identity.user_id, order_id, payment_method).await?;
    Ok(HttpResponse::Created().json(intent))
}

route!(my_payments => Get "/payments/mine" impl DeliveryDatabase, PaymentProvider where requires [Role::Customer]);
pub async fn my_payments<B: DeliveryDatabase, P: PaymentProvider>(
    identity: Identity,
    api: web::Data<PaymentFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    debug!("💻️ GET payments for {}", identity.user_id);
    let payments = api.list_customer_payments(identity.user_id).await?;
    Ok(HttpResponse::Ok().json(payments))
}

route!(refund_payment => Post "/payments/{id}/refund" impl DeliveryDatabase, PaymentProvider where requires [Role::Admin]);
pub async fn refund_payment<B: DeliveryDatabase, P: PaymentProvider>(
    identity: Identity,
    path: web::Path<i64>,
    body: Option<web::Json<RefundParams>>,
    api: web::Data<PaymentFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let payment_id = PaymentId(path.into_inner());
    let amount = body.and_then(|b| b.into_inner().amount);
    info!("💻️ Refund of {payment_id} requested by {}", identity.user_id);
    let payment = api.process_refund(payment_id, amount).await?;
    Ok(HttpResponse::Ok().json(payment))
}

route!(sync_payment => Post "/payments/{id}/sync" impl DeliveryDatabase, PaymentProvider where requires [Role::Customer, Role::Admin]);
/// Route handler that asks for an immediate provider check of one payment, for when a webhook seems to be late.
pub async fn sync_payment<B: DeliveryDatabase, P: PaymentProvider>(
    identity: Identity,
    path: web::Path<i64>,
    api: web::Data<PaymentFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let payment_id = PaymentId(path.into_inner());
    debug!("💻️ POST sync {payment_id} by {} {}", identity.role, identity.user_id);
    let job_id = api.request_payment_sync(identity.actor(), payment_id).await?;
    Ok(HttpResponse::Accepted().json(JobAccepted { job_id, message: format!("{payment_id} will be checked shortly") }))
}

//----------------------------------------------   Admin  ----------------------------------------------------
route!(dead_letters => Get "/admin/dead_letters" requires [Role::Admin]);
/// Route handler listing jobs that failed for good, most recent last.
pub async fn dead_letters(queue: web::Data<DeadLetterQueue>) -> Result<HttpResponse, ServerError> {
    debug!("💻️ GET dead letters");
    Ok(HttpResponse::Ok().json(queue.list()))
}

//----------------------------------------------   Webhooks  ----------------------------------------------------
route!(payment_webhook => Post "/webhook/payments" impl DeliveryDatabase, PaymentProvider);
/// Route handler for payment provider webhooks.
///
/// The signature in the `Stripe-Signature` header is checked against the raw body before anything else. Every
/// verified event is acknowledged with a 200, including duplicates, ignored event types and events for payments this
/// server does not know (yet). A 503 asks the provider to deliver the event again later.
pub async fn payment_webhook<B: DeliveryDatabase, P: PaymentProvider>(
    req: HttpRequest,
    body: web::Bytes,
    api: web::Data<PaymentFlowApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PaymentFlowError::InvalidSignature(format!("The {SIGNATURE_HEADER} header is missing")))?;
    trace!("💻️ Received payment webhook ({} bytes)", body.len());
    let outcome = api.handle_webhook(&body, signature).await?;
    Ok(HttpResponse::Ok().json(json!({ "received": true, "outcome": outcome })))
}

//----------------------------------------------   Websocket  ----------------------------------------------------
route!(websocket => Get "/ws" impl DeliveryDatabase);
