/// Example: Nested Orders
///
/// Two services, each running its work atomically, composed into one
/// business operation. The invoice service joins the order service's
/// transaction, so a failure in either rolls back both.
///
/// Run: cargo run --example nested_orders
use serde_json::json;
use std::time::Duration;
use transacter::{
    Atomic, ConnectionClosed, Context, MemoryStore, MemoryTx, Transacter, TransacterConfig,
};

type Tx = Transacter<MemoryTx, Repos>;

struct OrderRepo {
    tx: MemoryTx,
}

impl OrderRepo {
    async fn create(&self, id: u64, sku: &str) -> anyhow::Result<()> {
        self.tx
            .insert("orders", json!({ "id": id, "sku": sku }))
            .await?;
        Ok(())
    }
}

struct InvoiceRepo {
    tx: MemoryTx,
}

impl InvoiceRepo {
    async fn create(&self, number: &str, order_id: u64) -> anyhow::Result<()> {
        self.tx
            .insert("invoices", json!({ "id": number, "order": order_id }))
            .await?;
        Ok(())
    }
}

struct Repos {
    orders: OrderRepo,
    invoices: InvoiceRepo,
    billing: BillingService<Tx>,
}

#[derive(Clone)]
struct BillingService<A> {
    atomic: A,
}

impl<A> BillingService<A>
where
    A: Atomic<Repos>,
{
    fn invoice(
        &self,
        ctx: &Context,
        number: &'static str,
        order_id: u64,
    ) -> impl Future<Output = transacter::Result<()>> + Send {
        self.atomic
            .transact(ctx, move |_, repos| async move {
                repos.invoices.create(number, order_id).await
            })
    }
}

#[derive(Clone)]
struct OrderService<A> {
    atomic: A,
}

impl<A> OrderService<A>
where
    A: Atomic<Repos>,
{
    async fn place(
        &self,
        ctx: &Context,
        order_id: u64,
        sku: &'static str,
        invoice: &'static str,
    ) -> transacter::Result<()> {
        self.atomic
            .transact(ctx, move |ctx, repos| async move {
                repos.orders.create(order_id, sku).await?;
                // Same context: joins this transaction
                repos.billing.invoice(&ctx, invoice, order_id).await?;
                Ok(())
            })
            .await
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== Transacter Nested Orders Example ===\n");

    let store = MemoryStore::new();
    let config = TransacterConfig::new().backoffs([Duration::from_millis(50); 2]);
    let transacter: Tx = Transacter::new(
        store.executor(),
        |_: &Context, transacter: &Tx, tx: MemoryTx| {
            Ok(Repos {
                orders: OrderRepo { tx: tx.clone() },
                invoices: InvoiceRepo { tx },
                billing: BillingService {
                    atomic: transacter.clone(),
                },
            })
        },
    )
    .with_config(&config);
    let orders = OrderService {
        atomic: transacter.clone(),
    };
    let ctx = Context::background();

    // ============================================================================
    // 1. Successful order
    // ============================================================================
    println!("1. Placing order 1 with invoice INV-1:");
    orders.place(&ctx, 1, "lamp", "INV-1").await?;
    println!("   orders:   {:?}", store.rows("orders").await);
    println!("   invoices: {:?}", store.rows("invoices").await);
    println!("   stats:    {:?}", store.stats());
    println!();

    // ============================================================================
    // 2. Invoice failure rolls back the order
    // ============================================================================
    println!("2. Placing order 2 reusing invoice number INV-1:");
    match orders.place(&ctx, 2, "desk", "INV-1").await {
        Ok(()) => println!("   unexpected success"),
        Err(err) => println!("   failed: {}", err),
    }
    println!("   orders:   {:?}", store.rows("orders").await);
    println!("   invoices: {:?}", store.rows("invoices").await);
    println!("   stats:    {:?}", store.stats());
    println!();

    // ============================================================================
    // 3. Transient begin failure is retried
    // ============================================================================
    println!("3. Placing order 3 after a dropped connection:");
    store.fail_next_begin(ConnectionClosed);
    orders.place(&ctx, 3, "chair", "INV-3").await?;
    println!("   orders:   {:?}", store.rows("orders").await);
    println!("   stats:    {:?}", store.stats());

    Ok(())
}
