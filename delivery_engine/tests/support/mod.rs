#![allow(dead_code)]

use std::sync::Arc;

use chrono::Duration;
use delivery_engine::{
    db_types::{Money, Order, OrderStatusType, PaymentStatusType, UserId},
    notifications::{ConnectionRegistry, NotificationDispatcher, NotificationTarget},
    queue::{Job, JobError, JobHandler, QueueConfig, TaskQueue},
    test_utils::{
        fake_provider::FakePaymentProvider,
        fixtures::{seed_menu, Menu},
    },
    DeliveryDatabase,
    JobRouter,
    MemoryDatabase,
    OrderFlowApi,
    OrderFlowConfig,
    PaymentFlowApi,
    PaymentFlowConfig,
    SqliteDatabase,
};

pub struct Harness<B> {
    pub db: B,
    pub queue: TaskQueue,
    pub orders: Arc<OrderFlowApi<B>>,
    pub payments: Arc<PaymentFlowApi<B, FakePaymentProvider>>,
    pub provider: Arc<FakePaymentProvider>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: JobRouter<B, FakePaymentProvider>,
    pub menu: Menu,
}

/// Everything is "stale" and "past the grace window" straight away, so sweeps and polls pick up fresh records.
pub fn eager_configs() -> (OrderFlowConfig, PaymentFlowConfig) {
    let orders = OrderFlowConfig { unpaid_order_timeout: Duration::seconds(-5), ..Default::default() };
    let payments = PaymentFlowConfig { grace_period: Duration::seconds(-5), ..Default::default() };
    (orders, payments)
}

impl<B: DeliveryDatabase> Harness<B> {
    pub async fn new(db: B) -> Self {
        let (order_config, payment_config) = eager_configs();
        Self::with_config(db, Money::from(1000), order_config, payment_config).await
    }

    pub async fn with_config(
        db: B,
        minimum_order: Money,
        order_config: OrderFlowConfig,
        payment_config: PaymentFlowConfig,
    ) -> Self {
        let _ = env_logger::try_init();
        let menu = seed_menu(&db, minimum_order).await;
        let queue = TaskQueue::new(QueueConfig::default());
        let provider = Arc::new(FakePaymentProvider::new());
        let orders = Arc::new(OrderFlowApi::new(db.clone(), queue.producer(), order_config));
        let payments =
            Arc::new(PaymentFlowApi::new(db.clone(), Arc::clone(&provider), queue.producer(), payment_config));
        let registry = Arc::new(ConnectionRegistry::new());
        let router = JobRouter::new(
            Arc::clone(&orders),
            Arc::clone(&payments),
            NotificationDispatcher::new(Arc::clone(&registry)),
        );
        Self { db, queue, orders, payments, provider, registry, router, menu }
    }

    pub fn pending_jobs(&mut self) -> Vec<Job> {
        self.queue.drain_pending()
    }

    /// Runs queued jobs, and whatever they enqueue, until the queue is empty.
    pub async fn run_jobs(&mut self) -> Vec<(Job, Result<(), JobError>)> {
        let mut results = Vec::new();
        loop {
            let jobs = self.queue.drain_pending();
            if jobs.is_empty() {
                return results;
            }
            for job in jobs {
                let result = self.router.handle(&job).await;
                results.push((job, result));
            }
        }
    }

    /// A placed order of two pastas (25.00) for the default customer.
    pub async fn place_order(&mut self, customer: UserId) -> Order {
        let order = self.orders.place_order(customer, self.menu.two_pastas()).await.expect("Error placing order");
        self.queue.drain_pending();
        order
    }

    /// A placed order that has been paid for and confirmed, with the queue drained.
    pub async fn confirmed_order(&mut self, customer: UserId) -> Order {
        let order = self.place_order(customer).await;
        let intent = self
            .payments
            .create_intent(customer, order.id, delivery_engine::db_types::PaymentMethod::CreditCard)
            .await
            .expect("Error creating intent");
        let reference = intent.payment.provider_reference.clone();
        let body = FakePaymentProvider::succeeded_payload(&format!("evt_ok_{}", order.id.value()), &reference);
        self.payments.handle_webhook(&body, FakePaymentProvider::SIGNATURE).await.expect("Error applying webhook");
        self.run_jobs().await;
        let order = self.orders.fetch_order(order.id).await.expect("Error fetching order");
        assert_eq!(order.status, OrderStatusType::Confirmed);
        assert_eq!(order.payment_status, PaymentStatusType::Completed);
        order
    }
}

pub async fn memory_harness() -> Harness<MemoryDatabase> {
    Harness::new(MemoryDatabase::new()).await
}

pub async fn sqlite_harness() -> Harness<SqliteDatabase> {
    let db = delivery_engine::test_utils::prepare_env::fresh_database().await;
    Harness::new(db).await
}

pub fn status_jobs(jobs: &[Job], target: OrderStatusType) -> usize {
    jobs.iter().filter(|j| matches!(j, Job::UpdateOrderStatus { target_status, .. } if *target_status == target)).count()
}

pub fn notifications_for(jobs: &[Job], user: UserId) -> Vec<&delivery_engine::notifications::NotificationMessage> {
    jobs.iter()
        .filter_map(|j| match j {
            Job::DispatchNotification { target: NotificationTarget::User(u), message } if *u == user => Some(message),
            _ => None,
        })
        .collect()
}
