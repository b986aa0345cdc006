//! Variable resolution for template rendering.
//!
//! Turns a trigger plus its [`NotificationContext`] into the flat variable
//! map the renderer substitutes into template content. Store identity comes
//! from configuration, entity-derived variables from the store projections,
//! and caller passthrough values fill whatever is still missing.
//!
//! A lookup miss is not an error: the derived variables are simply absent
//! and rendering degrades to leaving their placeholders visible. Store I/O
//! failures do propagate.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::config::IdentityConfig;
use crate::context::{EntityRef, NotificationContext};
use crate::store::{CustomerRecord, NotificationStore, StoreResult};
use crate::trigger::Trigger;

/// Output of one resolution pass.
#[derive(Debug, Clone, Default)]
pub struct ResolvedVariables {
    /// Variables handed to the renderer.
    pub variables: BTreeMap<String, Value>,
    /// Destination number, consumed by the dispatcher rather than the
    /// renderer.
    pub recipient_phone: Option<String>,
}

/// Amounts render as a plain integer with the currency suffix, no
/// thousands separator.
pub fn format_cfa(amount: i64) -> String {
    format!("{amount} CFA")
}

/// Dates render as dd/mm/YYYY.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// Resolves template variables against the store.
pub struct VariableResolver {
    store: Arc<dyn NotificationStore>,
    identity: IdentityConfig,
}

impl VariableResolver {
    pub fn new(store: Arc<dyn NotificationStore>, identity: IdentityConfig) -> Self {
        Self { store, identity }
    }

    /// Resolve the variable map for one notification.
    ///
    /// Resolution order: store identity, entity-derived variables, caller
    /// passthrough (only keys not already resolved), then typed defaults
    /// for the triggers without a backing entity.
    pub async fn resolve(
        &self,
        trigger: Trigger,
        context: &NotificationContext,
    ) -> StoreResult<ResolvedVariables> {
        let mut variables = BTreeMap::new();
        self.seed_identity(&mut variables);

        let mut entity_phone: Option<String> = None;

        match &context.entity {
            EntityRef::Order(id) => {
                entity_phone = self.resolve_order(id, &mut variables).await?;
            }
            EntityRef::Product(id) => {
                self.resolve_product(id, &mut variables).await?;
            }
            EntityRef::Customer(id) => {
                entity_phone = self.resolve_customer(id, trigger, &mut variables).await?;
            }
            EntityRef::Review(id) => {
                self.resolve_review(id, &mut variables).await?;
            }
            EntityRef::None => {}
        }

        // Caller passthrough: raw values first, then the typed overrides.
        // Entity-derived variables always win; passthrough only fills gaps.
        for (key, value) in &context.values {
            variables
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        apply_overrides(context, &mut variables);

        if context.entity == EntityRef::None {
            self.apply_raw_defaults(trigger, &mut variables).await?;
        }

        let recipient_phone = context
            .overrides
            .recipient_phone
            .clone()
            .or_else(|| context.overrides.billing_phone.clone())
            .or(entity_phone);

        Ok(ResolvedVariables {
            variables,
            recipient_phone,
        })
    }

    fn seed_identity(&self, variables: &mut BTreeMap<String, Value>) {
        variables.insert("store_name".into(), json!(self.identity.store_name));
        variables.insert("store_phone".into(), json!(self.identity.store_phone));
        variables.insert("store_url".into(), json!(self.identity.store_url));
        variables.insert("store_whatsapp".into(), json!(self.identity.store_whatsapp));
        variables.insert("store_address".into(), json!(self.identity.store_address));
    }

    async fn resolve_order(
        &self,
        order_id: &str,
        variables: &mut BTreeMap<String, Value>,
    ) -> StoreResult<Option<String>> {
        let Some(order) = self.store.fetch_order(order_id).await? else {
            tracing::debug!(order_id = %order_id, "Order not found, rendering degraded");
            return Ok(None);
        };

        variables.insert("order_number".into(), json!(order.number));
        variables.insert("order_date".into(), json!(format_date(&order.created_at)));
        variables.insert("order_status".into(), json!(order.status.as_str()));
        variables.insert("order_total".into(), json!(format_cfa(order.total)));
        variables.insert(
            "shipping_address".into(),
            json!(order.shipping_address.clone().unwrap_or_default()),
        );

        let products_list = order
            .lines
            .iter()
            .map(|line| format!("{}x {}", line.quantity, line.product_name))
            .collect::<Vec<_>>()
            .join(", ");
        let product_names = order
            .lines
            .iter()
            .map(|line| line.product_name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        variables.insert("products_list".into(), json!(products_list));
        variables.insert("product_names".into(), json!(product_names));

        if let Some(tracking) = &order.tracking_number {
            variables.insert("tracking_number".into(), json!(tracking));
        }
        if let Some(invoice_number) = &order.invoice_number {
            variables.insert("invoice_number".into(), json!(invoice_number));
        }
        if let Some(invoice_url) = &order.invoice_url {
            variables.insert("invoice_url".into(), json!(invoice_url));
        }

        Ok(order.customer.as_ref().and_then(|customer| {
            insert_customer_fields(customer, variables);
            customer.preferred_phone().map(str::to_string)
        }))
    }

    async fn resolve_product(
        &self,
        product_id: &str,
        variables: &mut BTreeMap<String, Value>,
    ) -> StoreResult<()> {
        let Some(product) = self.store.fetch_product(product_id).await? else {
            tracing::debug!(product_id = %product_id, "Product not found, rendering degraded");
            return Ok(());
        };

        variables.insert("product_name".into(), json!(product.name));
        variables.insert("product_price".into(), json!(format_cfa(product.price)));
        variables.insert("product_stock".into(), json!(product.stock));
        variables.insert("stock_threshold".into(), json!(product.low_stock_threshold));
        Ok(())
    }

    async fn resolve_customer(
        &self,
        customer_id: &str,
        trigger: Trigger,
        variables: &mut BTreeMap<String, Value>,
    ) -> StoreResult<Option<String>> {
        let Some(customer) = self.store.fetch_customer(customer_id).await? else {
            tracing::debug!(customer_id = %customer_id, "Customer not found, rendering degraded");
            return Ok(None);
        };

        insert_customer_fields(&customer, variables);
        variables.insert(
            "customer_email".into(),
            json!(customer.email.clone().unwrap_or_default()),
        );
        variables.insert(
            "customer_city".into(),
            json!(customer.city.clone().unwrap_or_default()),
        );
        variables.insert(
            "customer_country".into(),
            json!(customer.country.clone().unwrap_or_default()),
        );
        variables.insert(
            "registration_date".into(),
            json!(format_date(&customer.created_at)),
        );

        if trigger == Trigger::NewCustomerAdmin {
            let total = self.store.count_customers().await?;
            variables.insert("total_customers".into(), json!(total));
        }

        Ok(customer.preferred_phone().map(str::to_string))
    }

    async fn resolve_review(
        &self,
        review_id: &str,
        variables: &mut BTreeMap<String, Value>,
    ) -> StoreResult<()> {
        let Some(review) = self.store.fetch_review(review_id).await? else {
            tracing::debug!(review_id = %review_id, "Review not found, rendering degraded");
            return Ok(());
        };

        variables.insert("rating".into(), json!(review.rating));
        variables.insert(
            "review_comment".into(),
            json!(review.comment.clone().unwrap_or_default()),
        );
        variables.insert(
            "verified_purchase".into(),
            json!(if review.verified_purchase { "oui" } else { "non" }),
        );
        if let Some(customer) = &review.customer {
            variables.insert("customer_name".into(), json!(customer.name));
        }
        if let Some(product) = &review.product {
            variables.insert("product_name".into(), json!(product.name));
        }
        Ok(())
    }

    /// Typed defaults for triggers without a backing entity: missing
    /// numerics become 0, the customer name becomes "Client", other
    /// strings become empty.
    async fn apply_raw_defaults(
        &self,
        trigger: Trigger,
        variables: &mut BTreeMap<String, Value>,
    ) -> StoreResult<()> {
        match trigger {
            Trigger::LoyaltyPointsEarned => {
                default_string(variables, "customer_name", "Client");
                default_number(variables, "points_earned");
                default_number(variables, "points_total");
            }
            Trigger::AbandonedCart => {
                default_string(variables, "customer_name", "Client");
                default_number(variables, "cart_items_count");
                default_number(variables, "cart_total");
            }
            Trigger::PasswordReset => {
                default_string(variables, "customer_name", "Client");
                default_string(variables, "reset_code", "");
            }
            Trigger::DailyReportAdmin => {
                default_number(variables, "orders_count");
                default_number(variables, "revenue_total");
                default_number(variables, "new_customers_count");
                let low_stock = self.store.count_low_stock_products().await?;
                variables.insert("low_stock_count".into(), json!(low_stock));
            }
            _ => {}
        }
        Ok(())
    }
}

fn insert_customer_fields(customer: &CustomerRecord, variables: &mut BTreeMap<String, Value>) {
    variables.insert("customer_name".into(), json!(customer.name));
    variables.insert(
        "customer_phone".into(),
        json!(customer.phone.clone().unwrap_or_default()),
    );
}

fn apply_overrides(context: &NotificationContext, variables: &mut BTreeMap<String, Value>) {
    let overrides = &context.overrides;
    if let Some(name) = &overrides.customer_name {
        variables
            .entry("customer_name".into())
            .or_insert_with(|| json!(name));
    }
    if let Some(number) = &overrides.order_number {
        variables
            .entry("order_number".into())
            .or_insert_with(|| json!(number));
    }
    if let Some(invoice_number) = &overrides.invoice_number {
        variables
            .entry("invoice_number".into())
            .or_insert_with(|| json!(invoice_number));
    }
    if let Some(total) = overrides.order_total {
        variables
            .entry("order_total".into())
            .or_insert_with(|| json!(format_cfa(total)));
    }
    if let Some(date) = &overrides.order_date {
        variables
            .entry("order_date".into())
            .or_insert_with(|| json!(date));
    }
    if let Some(url) = &overrides.invoice_url {
        variables
            .entry("invoice_url".into())
            .or_insert_with(|| json!(url));
    }
    if let Some(phone) = &overrides.billing_phone {
        variables
            .entry("billing_phone".into())
            .or_insert_with(|| json!(phone));
    }
}

fn default_number(variables: &mut BTreeMap<String, Value>, key: &str) {
    variables.entry(key.into()).or_insert_with(|| json!(0));
}

fn default_string(variables: &mut BTreeMap<String, Value>, key: &str, fallback: &str) {
    variables
        .entry(key.into())
        .or_insert_with(|| json!(fallback));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NotificationContext;
    use crate::store::{
        CustomerRecord, MemoryStore, OrderDetails, OrderLine, OrderStatus, PaymentStatus,
        ProductRecord, ReviewRecord,
    };
    use chrono::TimeZone;

    fn identity() -> IdentityConfig {
        IdentityConfig {
            store_name: "Atelier Dakar".to_string(),
            store_phone: "+221330000000".to_string(),
            store_url: "https://atelier.example".to_string(),
            store_whatsapp: "+221780000000".to_string(),
            store_address: "Plateau, Dakar".to_string(),
        }
    }

    fn sample_customer() -> CustomerRecord {
        CustomerRecord {
            id: "cust-1".to_string(),
            name: "Awa Ndiaye".to_string(),
            phone: Some("+221770000001".to_string()),
            whatsapp: Some("+221780000002".to_string()),
            email: Some("awa@example.com".to_string()),
            city: Some("Dakar".to_string()),
            country: Some("Sénégal".to_string()),
            created_at: Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap(),
        }
    }

    fn sample_order() -> OrderDetails {
        OrderDetails {
            id: "ord-1".to_string(),
            number: "CMD-2081".to_string(),
            status: OrderStatus::Processing,
            payment_status: PaymentStatus::Pending,
            total: 15000,
            created_at: Utc.with_ymd_and_hms(2025, 1, 12, 9, 30, 0).unwrap(),
            customer: Some(sample_customer()),
            lines: vec![
                OrderLine {
                    product_name: "Chemise lin".to_string(),
                    quantity: 2,
                },
                OrderLine {
                    product_name: "Pantalon".to_string(),
                    quantity: 1,
                },
            ],
            shipping_address: Some("Sicap Liberté 4, Dakar".to_string()),
            tracking_number: None,
            invoice_number: None,
            invoice_url: None,
        }
    }

    fn resolver_with(store: MemoryStore) -> VariableResolver {
        VariableResolver::new(Arc::new(store), identity())
    }

    #[tokio::test]
    async fn test_order_resolution_derives_everything() {
        let store = MemoryStore::new();
        store.seed_order(sample_order());
        let resolver = resolver_with(store);

        let resolved = resolver
            .resolve(Trigger::OrderPlaced, &NotificationContext::order("ord-1"))
            .await
            .unwrap();

        let vars = &resolved.variables;
        assert_eq!(vars["store_name"], json!("Atelier Dakar"));
        assert_eq!(vars["customer_name"], json!("Awa Ndiaye"));
        assert_eq!(vars["order_number"], json!("CMD-2081"));
        assert_eq!(vars["order_date"], json!("12/01/2025"));
        assert_eq!(vars["order_status"], json!("processing"));
        assert_eq!(vars["order_total"], json!("15000 CFA"));
        assert_eq!(vars["products_list"], json!("2x Chemise lin, 1x Pantalon"));
        assert_eq!(vars["product_names"], json!("Chemise lin, Pantalon"));
        assert_eq!(vars["shipping_address"], json!("Sicap Liberté 4, Dakar"));
        // Absent optionals stay absent rather than rendering empty
        assert!(!vars.contains_key("tracking_number"));
        assert!(!vars.contains_key("invoice_number"));

        // WhatsApp number wins over the main phone
        assert_eq!(resolved.recipient_phone.as_deref(), Some("+221780000002"));
    }

    #[tokio::test]
    async fn test_missing_order_degrades_silently() {
        let resolver = resolver_with(MemoryStore::new());

        let resolved = resolver
            .resolve(Trigger::OrderPlaced, &NotificationContext::order("nope"))
            .await
            .unwrap();

        assert_eq!(resolved.variables["store_name"], json!("Atelier Dakar"));
        assert!(!resolved.variables.contains_key("order_number"));
        assert!(resolved.recipient_phone.is_none());
    }

    #[tokio::test]
    async fn test_entity_wins_over_passthrough() {
        let store = MemoryStore::new();
        store.seed_order(sample_order());
        let resolver = resolver_with(store);

        let context = NotificationContext::order("ord-1")
            .with_order_number("OVERRIDE-1")
            .with_invoice_number("INV-77");
        let resolved = resolver
            .resolve(Trigger::InvoiceCreated, &context)
            .await
            .unwrap();

        // Derived from the order, not the override
        assert_eq!(resolved.variables["order_number"], json!("CMD-2081"));
        // The order has no invoice, so the override fills the gap
        assert_eq!(resolved.variables["invoice_number"], json!("INV-77"));
    }

    #[tokio::test]
    async fn test_standalone_invoice_without_entity() {
        let resolver = resolver_with(MemoryStore::new());

        let context = NotificationContext::raw()
            .with_customer_name("Moussa Sarr")
            .with_invoice_number("INV-2025-003")
            .with_order_total(48500)
            .with_invoice_url("https://atelier.example/inv/3.pdf")
            .with_billing_phone("+221771112233");
        let resolved = resolver
            .resolve(Trigger::InvoiceCreated, &context)
            .await
            .unwrap();

        let vars = &resolved.variables;
        assert_eq!(vars["customer_name"], json!("Moussa Sarr"));
        assert_eq!(vars["invoice_number"], json!("INV-2025-003"));
        assert_eq!(vars["order_total"], json!("48500 CFA"));
        assert_eq!(vars["billing_phone"], json!("+221771112233"));
        assert_eq!(resolved.recipient_phone.as_deref(), Some("+221771112233"));
    }

    #[tokio::test]
    async fn test_recipient_phone_chain() {
        let store = MemoryStore::new();
        store.seed_order(sample_order());
        let resolver = resolver_with(store);

        // Explicit recipient beats billing phone beats the entity number
        let context = NotificationContext::order("ord-1")
            .with_billing_phone("+221772220000")
            .with_recipient_phone("+221773330000");
        let resolved = resolver
            .resolve(Trigger::OrderPlaced, &context)
            .await
            .unwrap();
        assert_eq!(resolved.recipient_phone.as_deref(), Some("+221773330000"));

        let context = NotificationContext::order("ord-1").with_billing_phone("+221772220000");
        let resolved = resolver
            .resolve(Trigger::OrderPlaced, &context)
            .await
            .unwrap();
        assert_eq!(resolved.recipient_phone.as_deref(), Some("+221772220000"));
    }

    #[tokio::test]
    async fn test_product_resolution() {
        let store = MemoryStore::new();
        store.seed_product(ProductRecord {
            id: "prod-9".to_string(),
            name: "Boubou brodé".to_string(),
            price: 25000,
            stock: 2,
            low_stock_threshold: 5,
        });
        let resolver = resolver_with(store);

        let resolved = resolver
            .resolve(
                Trigger::LowStockAdmin,
                &NotificationContext::product("prod-9"),
            )
            .await
            .unwrap();

        let vars = &resolved.variables;
        assert_eq!(vars["product_name"], json!("Boubou brodé"));
        assert_eq!(vars["product_price"], json!("25000 CFA"));
        assert_eq!(vars["product_stock"], json!(2));
        assert_eq!(vars["stock_threshold"], json!(5));
    }

    #[tokio::test]
    async fn test_new_customer_admin_counts_customers() {
        let store = MemoryStore::new();
        store.seed_customer(sample_customer());
        let resolver = resolver_with(store);

        let resolved = resolver
            .resolve(
                Trigger::NewCustomerAdmin,
                &NotificationContext::customer("cust-1"),
            )
            .await
            .unwrap();

        let vars = &resolved.variables;
        assert_eq!(vars["customer_name"], json!("Awa Ndiaye"));
        assert_eq!(vars["customer_email"], json!("awa@example.com"));
        assert_eq!(vars["registration_date"], json!("05/03/2024"));
        assert_eq!(vars["total_customers"], json!(1));

        // The plain account trigger does not pay for the count query
        let resolved = resolver
            .resolve(
                Trigger::NewAccount,
                &NotificationContext::customer("cust-1"),
            )
            .await
            .unwrap();
        assert!(!resolved.variables.contains_key("total_customers"));
    }

    #[tokio::test]
    async fn test_review_resolution() {
        let store = MemoryStore::new();
        store.seed_review(ReviewRecord {
            id: "rev-1".to_string(),
            rating: 4,
            comment: Some("Très belle coupe".to_string()),
            verified_purchase: true,
            customer: Some(sample_customer()),
            product: Some(ProductRecord {
                id: "prod-9".to_string(),
                name: "Boubou brodé".to_string(),
                price: 25000,
                stock: 2,
                low_stock_threshold: 5,
            }),
        });
        let resolver = resolver_with(store);

        let resolved = resolver
            .resolve(
                Trigger::NewReviewAdmin,
                &NotificationContext::review("rev-1"),
            )
            .await
            .unwrap();

        let vars = &resolved.variables;
        assert_eq!(vars["rating"], json!(4));
        assert_eq!(vars["review_comment"], json!("Très belle coupe"));
        assert_eq!(vars["verified_purchase"], json!("oui"));
        assert_eq!(vars["customer_name"], json!("Awa Ndiaye"));
        assert_eq!(vars["product_name"], json!("Boubou brodé"));
    }

    #[tokio::test]
    async fn test_raw_trigger_defaults() {
        let resolver = resolver_with(MemoryStore::new());

        let resolved = resolver
            .resolve(
                Trigger::LoyaltyPointsEarned,
                &NotificationContext::raw().with_value("points_earned", 120),
            )
            .await
            .unwrap();

        let vars = &resolved.variables;
        assert_eq!(vars["points_earned"], json!(120));
        assert_eq!(vars["points_total"], json!(0));
        assert_eq!(vars["customer_name"], json!("Client"));
    }

    #[tokio::test]
    async fn test_daily_report_counts_low_stock() {
        let store = MemoryStore::new();
        store.seed_product(ProductRecord {
            id: "p1".to_string(),
            name: "A".to_string(),
            price: 1000,
            stock: 1,
            low_stock_threshold: 5,
        });
        store.seed_product(ProductRecord {
            id: "p2".to_string(),
            name: "B".to_string(),
            price: 1000,
            stock: 50,
            low_stock_threshold: 5,
        });
        let resolver = resolver_with(store);

        let resolved = resolver
            .resolve(
                Trigger::DailyReportAdmin,
                &NotificationContext::raw()
                    .with_value("orders_count", 7)
                    .with_value("revenue_total", 182000),
            )
            .await
            .unwrap();

        let vars = &resolved.variables;
        assert_eq!(vars["orders_count"], json!(7));
        assert_eq!(vars["revenue_total"], json!(182000));
        assert_eq!(vars["new_customers_count"], json!(0));
        assert_eq!(vars["low_stock_count"], json!(1));
    }
}
