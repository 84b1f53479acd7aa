use std::sync::Arc;

use actix_web::{body::MessageBody, http::StatusCode, test, test::TestRequest, App};
use delivery_engine::{
    db_types::{Actor, Money, Order, OrderStatusType, Role, UserId},
    gateway::PaymentProvider,
    notifications::{ConnectionRegistry, NotificationDispatcher},
    queue::{JobHandler, QueueConfig, TaskQueue},
    test_utils::fixtures::{seed_menu, Menu, ADMIN_ID, CUSTOMER_ID},
    DeliveryDatabase,
    JobRouter,
    MemoryDatabase,
    OrderFlowApi,
    OrderFlowConfig,
    PaymentFlowApi,
    PaymentFlowConfig,
};
use log::*;
use serde_json::Value;

use crate::{
    config::ServerOptions,
    identity::{USER_ID_HEADER, USER_ROLE_HEADER},
    server::ServerState,
};

/// The full set of routes over an in-memory database. Jobs are not run until [`TestServer::run_jobs`] is called.
pub struct TestServer<P> {
    pub queue: TaskQueue,
    pub state: ServerState<MemoryDatabase, P>,
    pub provider: Arc<P>,
    pub menu: Menu,
    router: JobRouter<MemoryDatabase, P>,
}

impl<P: PaymentProvider> TestServer<P> {
    pub async fn with_provider(provider: P) -> Self {
        let _ = env_logger::try_init();
        let provider = Arc::new(provider);
        let db = MemoryDatabase::new();
        let menu = seed_menu(&db, Money::from(1000)).await;
        let queue = TaskQueue::new(QueueConfig::default());
        let orders = Arc::new(OrderFlowApi::new(db.clone(), queue.producer(), OrderFlowConfig::default()));
        let payments =
            Arc::new(PaymentFlowApi::new(db, Arc::clone(&provider), queue.producer(), PaymentFlowConfig::default()));
        let registry = Arc::new(ConnectionRegistry::new());
        let router = JobRouter::new(
            Arc::clone(&orders),
            Arc::clone(&payments),
            NotificationDispatcher::new(Arc::clone(&registry)),
        );
        let state = ServerState {
            orders,
            payments,
            registry,
            dead_letters: queue.dead_letters(),
            options: ServerOptions::default(),
        };
        Self { queue, state, provider, menu, router }
    }

    pub async fn send(&self, req: TestRequest) -> (StatusCode, Value) {
        send_request(&self.state, req).await
    }

    /// Runs queued jobs, and whatever they enqueue, until the queue is empty. Returns the number of jobs run.
    pub async fn run_jobs(&mut self) -> usize {
        let mut count = 0;
        loop {
            let jobs = self.queue.drain_pending();
            if jobs.is_empty() {
                return count;
            }
            for job in jobs {
                count += 1;
                if let Err(e) = self.router.handle(&job).await {
                    warn!("Job {} failed in test: {e}", job.name());
                }
            }
        }
    }

    /// A pending order for two pastas, placed by `CUSTOMER_ID` directly through the engine.
    pub async fn place_order(&mut self) -> Order {
        let order = self.state.orders.place_order(CUSTOMER_ID, self.menu.two_pastas()).await.unwrap();
        self.queue.drain_pending();
        order
    }

    /// Walks an order forward as an admin, without going through the HTTP layer.
    pub async fn advance(&mut self, order: &Order, path: &[OrderStatusType]) -> Order {
        let mut current = order.clone();
        for status in path {
            current = self.state.orders.transition(order.id, Actor::Admin(ADMIN_ID), *status, None).await.unwrap();
        }
        self.queue.drain_pending();
        current
    }

    pub async fn order_status(&self, order: &Order) -> OrderStatusType {
        self.state.orders.fetch_order(order.id).await.unwrap().status
    }
}

pub fn as_user(req: TestRequest, user_id: UserId, role: Role) -> TestRequest {
    req.insert_header((USER_ID_HEADER, user_id.value().to_string())).insert_header((USER_ROLE_HEADER, role.to_string()))
}

/// Sends one request through a freshly configured app and returns the status and JSON body. Errors raised by
/// middleware are rendered the same way the server would render them.
pub async fn send_request<B: DeliveryDatabase, P: PaymentProvider>(
    state: &ServerState<B, P>,
    req: TestRequest,
) -> (StatusCode, Value) {
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;
    let (status, bytes) = match test::try_call_service(&app, req.to_request()).await {
        Ok(res) => {
            let status = res.status();
            (status, test::read_body(res).await)
        },
        Err(e) => {
            let res = e.error_response();
            (res.status(), res.into_body().try_into_bytes().unwrap_or_default())
        },
    };
    debug!("Response: {status} {}", String::from_utf8_lossy(&bytes));
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}
