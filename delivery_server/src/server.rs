use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use delivery_engine::{
    gateway::PaymentProvider,
    notifications::{ConnectionRegistry, NotificationDispatcher},
    queue::{DeadLetterQueue, TaskQueue},
    DeliveryDatabase,
    JobRouter,
    OrderFlowApi,
    PaymentFlowApi,
    SqliteDatabase,
};
use log::*;

use crate::{
    config::{ServerConfig, ServerOptions},
    errors::ServerError,
    integrations::StripePaymentProvider,
    routes::{
        health,
        AssignOrderRoute,
        AvailableDeliveriesRoute,
        CancelOrderRoute,
        CreatePaymentIntentRoute,
        DeadLettersRoute,
        MyOrdersRoute,
        MyPaymentsRoute,
        OrderByIdRoute,
        PaymentWebhookRoute,
        PlaceOrderRoute,
        RefundPaymentRoute,
        RestaurantOrdersRoute,
        SyncPaymentRoute,
        UpdateOrderStatusRoute,
        WebsocketRoute,
    },
    scheduler::start_scheduler,
};

/// Everything the request handlers share. The job workers hold the same `Arc`s, so an order placed over HTTP and a
/// transition applied by a worker go through the same API instance.
pub struct ServerState<B, P> {
    pub orders: Arc<OrderFlowApi<B>>,
    pub payments: Arc<PaymentFlowApi<B, P>>,
    pub registry: Arc<ConnectionRegistry>,
    pub dead_letters: DeadLetterQueue,
    pub options: ServerOptions,
}

impl<B, P> Clone for ServerState<B, P> {
    fn clone(&self) -> Self {
        Self {
            orders: Arc::clone(&self.orders),
            payments: Arc::clone(&self.payments),
            registry: Arc::clone(&self.registry),
            dead_letters: self.dead_letters.clone(),
            options: self.options,
        }
    }
}

impl<B, P> ServerState<B, P>
where
    B: DeliveryDatabase,
    P: PaymentProvider,
{
    /// Registers the shared state and every route on an app. Used by the server and by the endpoint tests.
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        let json_config = web::JsonConfig::default()
            .error_handler(|err, _req| ServerError::InvalidRequestBody(err.to_string()).into());
        let path_config = web::PathConfig::default()
            .error_handler(|err, _req| ServerError::InvalidRequestPath(err.to_string()).into());
        let query_config = web::QueryConfig::default()
            .error_handler(|err, _req| ServerError::InvalidRequestQuery(err.to_string()).into());
        let api_scope = web::scope("/api")
            .service(PlaceOrderRoute::<B>::new())
            .service(MyOrdersRoute::<B>::new())
            .service(RestaurantOrdersRoute::<B>::new())
            .service(AvailableDeliveriesRoute::<B>::new())
            .service(OrderByIdRoute::<B>::new())
            .service(UpdateOrderStatusRoute::<B>::new())
            .service(CancelOrderRoute::<B>::new())
            .service(AssignOrderRoute::<B>::new())
            .service(CreatePaymentIntentRoute::<B, P>::new())
            .service(MyPaymentsRoute::<B, P>::new())
            .service(RefundPaymentRoute::<B, P>::new())
            .service(SyncPaymentRoute::<B, P>::new())
            .service(DeadLettersRoute::new());
        cfg.app_data(web::Data::from(Arc::clone(&self.orders)))
            .app_data(web::Data::from(Arc::clone(&self.payments)))
            .app_data(web::Data::from(Arc::clone(&self.registry)))
            .app_data(web::Data::new(self.dead_letters.clone()))
            .app_data(web::Data::new(self.options))
            .app_data(json_config)
            .app_data(path_config)
            .app_data(query_config)
            .service(health)
            .service(PaymentWebhookRoute::<B, P>::new())
            .service(WebsocketRoute::<B>::new())
            .service(api_scope);
    }
}

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let provider = StripePaymentProvider::new(config.stripe.clone())
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;

    let queue = TaskQueue::new(config.queue.clone());
    let producer = queue.producer();
    let orders = Arc::new(OrderFlowApi::new(db.clone(), producer.clone(), config.orders.clone()));
    let payments =
        Arc::new(PaymentFlowApi::new(db, Arc::new(provider), producer.clone(), config.payments.clone()));
    let registry = Arc::new(ConnectionRegistry::new());
    let router = JobRouter::new(
        Arc::clone(&orders),
        Arc::clone(&payments),
        NotificationDispatcher::new(Arc::clone(&registry)),
    );
    let dead_letters = queue.dead_letters();
    let queue = queue.start(Arc::new(router));
    let scheduler = start_scheduler(producer, config.scheduler);

    let state = ServerState { orders, payments, registry, dead_letters, options: ServerOptions::from_config(&config) };
    let srv = create_server_instance(&config, state)?;
    let result = srv.await.map_err(|e| ServerError::Unspecified(e.to_string()));
    info!("🚀️ Server stopped. Shutting down background work");
    scheduler.iter().for_each(|h| h.abort());
    queue.shutdown().await;
    result
}

pub fn create_server_instance<B, P>(config: &ServerConfig, state: ServerState<B, P>) -> Result<Server, ServerError>
where
    B: DeliveryDatabase,
    P: PaymentProvider,
{
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("fds::access_log"))
            .configure(|cfg| state.configure(cfg))
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
