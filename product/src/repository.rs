use async_trait::async_trait;
use common::db::Updated;
use common::error::DomainError;
use common::pagination::{PageRequest, contains_pattern};
use outbox::{Message, PgMessageStore};
use sqlx::PgPool;
use sqlx::types::Decimal;
use uuid::Uuid;

use crate::domain::Product;

/// Narrows a product listing. Either price bound may be open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductFilter {
    pub search: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

impl ProductFilter {
    pub fn has_price_range(&self) -> bool {
        self.min_price.is_some() || self.max_price.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct ProductStats {
    pub total: i64,
    /// Rounded to two decimal places.
    pub average: Option<Decimal>,
    pub highest: Option<Decimal>,
    pub lowest: Option<Decimal>,
}

/// Product storage. Every write stages its event messages in the same
/// transaction as the row change.
#[async_trait]
pub trait ProductRepository: Send + Sync + 'static {
    async fn create(&self, product: &Product, events: &[Message]) -> Result<(), DomainError>;

    async fn get(&self, id: Uuid) -> Result<Option<Product>, DomainError>;

    /// Locks the product and hands the stored row to `apply`, which returns
    /// the replacement and its events, or `None` to leave the row as it is.
    async fn update_with<F>(&self, id: Uuid, apply: F) -> Result<Updated<Product>, DomainError>
    where
        F: FnOnce(&Product) -> Result<Option<(Product, Vec<Message>)>, DomainError> + Send;

    /// Removes the product and stages the events `staged` builds from the
    /// removed row. `None` when there was no such product.
    async fn delete_with<F>(&self, id: Uuid, staged: F) -> Result<Option<Product>, DomainError>
    where
        F: FnOnce(&Product) -> Vec<Message> + Send;

    /// Newest first, `page.fetch_limit()` rows at most, plus the size of the
    /// filtered set.
    async fn list(
        &self,
        filter: &ProductFilter,
        page: PageRequest,
    ) -> Result<(Vec<Product>, i64), DomainError>;

    async fn stats(&self) -> Result<ProductStats, DomainError>;
}

pub struct PgProductRepository {
    db: PgPool,
}

impl PgProductRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// WHERE clause for the four listing shapes, and the number of parameters
/// it binds.
fn filter_clause(filter: &ProductFilter) -> (&'static str, usize) {
    match (filter.search.is_some(), filter.has_price_range()) {
        (false, false) => ("", 0),
        (true, false) => ("WHERE name ILIKE $1", 1),
        (false, true) => (
            "WHERE ($1::numeric IS NULL OR price >= $1) AND ($2::numeric IS NULL OR price <= $2)",
            2,
        ),
        (true, true) => (
            "WHERE name ILIKE $1
               AND ($2::numeric IS NULL OR price >= $2) AND ($3::numeric IS NULL OR price <= $3)",
            3,
        ),
    }
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn create(&self, product: &Product, events: &[Message]) -> Result<(), DomainError> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO products (id, name, price, created_at, updated_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(product.price)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *tx)
        .await?;

        PgMessageStore::append_in(&mut *tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Product>, DomainError> {
        let product = sqlx::query_as::<_, Product>(
            "SELECT id, name, price, created_at, updated_at FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(product)
    }

    async fn update_with<F>(&self, id: Uuid, apply: F) -> Result<Updated<Product>, DomainError>
    where
        F: FnOnce(&Product) -> Result<Option<(Product, Vec<Message>)>, DomainError> + Send,
    {
        let mut tx = self.db.begin().await?;

        let current = sqlx::query_as::<_, Product>(
            "SELECT id, name, price, created_at, updated_at FROM products WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(current) = current else {
            return Ok(Updated::Missing);
        };
        let Some((product, events)) = apply(&current)? else {
            return Ok(Updated::Unchanged(current));
        };

        sqlx::query("UPDATE products SET name = $2, price = $3, updated_at = $4 WHERE id = $1")
            .bind(product.id)
            .bind(&product.name)
            .bind(product.price)
            .bind(product.updated_at)
            .execute(&mut *tx)
            .await?;

        PgMessageStore::append_in(&mut *tx, &events).await?;
        tx.commit().await?;
        Ok(Updated::Changed {
            previous: current,
            current: product,
        })
    }

    async fn delete_with<F>(&self, id: Uuid, staged: F) -> Result<Option<Product>, DomainError>
    where
        F: FnOnce(&Product) -> Vec<Message> + Send,
    {
        let mut tx = self.db.begin().await?;

        let removed = sqlx::query_as::<_, Product>(
            "DELETE FROM products WHERE id = $1 RETURNING id, name, price, created_at, updated_at",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(removed) = removed else {
            return Ok(None);
        };

        PgMessageStore::append_in(&mut *tx, &staged(&removed)).await?;
        tx.commit().await?;
        Ok(Some(removed))
    }

    async fn list(
        &self,
        filter: &ProductFilter,
        page: PageRequest,
    ) -> Result<(Vec<Product>, i64), DomainError> {
        let (clause, params) = filter_clause(filter);
        let pattern = filter.search.as_deref().map(contains_pattern);

        let select = format!(
            "SELECT id, name, price, created_at, updated_at FROM products {clause}
             ORDER BY created_at DESC, id
             LIMIT ${} OFFSET ${}",
            params + 1,
            params + 2
        );
        let mut query = sqlx::query_as::<_, Product>(&select);
        if let Some(pattern) = &pattern {
            query = query.bind(pattern);
        }
        if filter.has_price_range() {
            query = query.bind(filter.min_price).bind(filter.max_price);
        }
        let products = query
            .bind(page.fetch_limit())
            .bind(page.offset)
            .fetch_all(&self.db)
            .await?;

        let count = format!("SELECT COUNT(*) FROM products {clause}");
        let mut query = sqlx::query_scalar::<_, i64>(&count);
        if let Some(pattern) = &pattern {
            query = query.bind(pattern);
        }
        if filter.has_price_range() {
            query = query.bind(filter.min_price).bind(filter.max_price);
        }
        let total = query.fetch_one(&self.db).await?;

        Ok((products, total))
    }

    async fn stats(&self) -> Result<ProductStats, DomainError> {
        let stats = sqlx::query_as::<_, ProductStats>(
            "SELECT COUNT(*) AS total,
                    ROUND(AVG(price), 2) AS average,
                    MAX(price) AS highest,
                    MIN(price) AS lowest
             FROM products",
        )
        .fetch_one(&self.db)
        .await?;
        Ok(stats)
    }
}


#[cfg(test)]
mod tests {
    use outbox::topics;

    use super::*;
    use crate::events;

    fn price(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    async fn seeded(db: PgPool) -> PgProductRepository {
        let repo = PgProductRepository::new(db);
        for (name, amount) in [("Red Lamp", "10.00"), ("Blue Lamp", "30.00"), ("Red Chair", "50.00")] {
            repo.create(&Product::new(name, amount).unwrap(), &[]).await.unwrap();
        }
        repo
    }

    async fn names(repo: &PgProductRepository, filter: ProductFilter) -> (Vec<String>, i64) {
        let page = PageRequest { limit: 10, offset: 0 };
        let (products, total) = repo.list(&filter, page).await.unwrap();
        let mut names: Vec<String> = products.into_iter().map(|p| p.name).collect();
        names.sort();
        (names, total)
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn list_without_filter(db: PgPool) {
        let repo = seeded(db).await;
        let (found, total) = names(&repo, ProductFilter::default()).await;
        assert_eq!(found, ["Blue Lamp", "Red Chair", "Red Lamp"]);
        assert_eq!(total, 3);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn list_by_name(db: PgPool) {
        let repo = seeded(db).await;
        let filter = ProductFilter {
            search: Some("lamp".to_string()),
            ..Default::default()
        };
        let (found, total) = names(&repo, filter).await;
        assert_eq!(found, ["Blue Lamp", "Red Lamp"]);
        assert_eq!(total, 2);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn list_by_price_range(db: PgPool) {
        let repo = seeded(db).await;

        let closed = ProductFilter {
            min_price: Some(price("20")),
            max_price: Some(price("50")),
            ..Default::default()
        };
        assert_eq!(names(&repo, closed).await, (vec!["Blue Lamp".to_string(), "Red Chair".to_string()], 2));

        let lower_only = ProductFilter {
            min_price: Some(price("40")),
            ..Default::default()
        };
        assert_eq!(names(&repo, lower_only).await, (vec!["Red Chair".to_string()], 1));

        let upper_only = ProductFilter {
            max_price: Some(price("10")),
            ..Default::default()
        };
        assert_eq!(names(&repo, upper_only).await, (vec!["Red Lamp".to_string()], 1));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn list_by_name_and_price_range(db: PgPool) {
        let repo = seeded(db).await;
        let filter = ProductFilter {
            search: Some("RED".to_string()),
            min_price: None,
            max_price: Some(price("20")),
        };
        let (found, total) = names(&repo, filter).await;
        assert_eq!(found, ["Red Lamp"]);
        assert_eq!(total, 1);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn list_counts_past_the_page(db: PgPool) {
        let repo = seeded(db).await;
        let page = PageRequest { limit: 1, offset: 1 };
        let (products, total) = repo.list(&ProductFilter::default(), page).await.unwrap();
        // One row plus the lookahead row.
        assert_eq!(products.len(), 2);
        assert_eq!(total, 3);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn stats_round_half_away_from_zero(db: PgPool) {
        let repo = PgProductRepository::new(db);
        assert_eq!(repo.stats().await.unwrap(), ProductStats::default());

        for amount in ["0.01", "0.04"] {
            repo.create(&Product::new("Pin", amount).unwrap(), &[]).await.unwrap();
        }
        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.average, Some(price("0.03")));
        assert_eq!(stats.highest, Some(price("0.04")));
        assert_eq!(stats.lowest, Some(price("0.01")));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn rejected_row_stages_nothing(db: PgPool) {
        let repo = PgProductRepository::new(db.clone());
        let mut product = Product::new("Lamp", "10.00").unwrap();
        product.price = price("-1.00");

        assert!(repo.create(&product, &[events::created(&product, "c-1")]).await.is_err());
        assert!(repo.get(product.id).await.unwrap().is_none());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn price_change_stages_both_events(db: PgPool) {
        let repo = PgProductRepository::new(db.clone());
        let lamp = Product::new("Lamp", "10.00").unwrap();
        repo.create(&lamp, &[]).await.unwrap();

        let updated = repo
            .update_with(lamp.id, |current| {
                let Some(change) = current.with_details("Lamp", "12.50")? else {
                    return Ok(None);
                };
                let staged = events::updated(&change, current, "c-1");
                Ok(Some((change.product, staged)))
            })
            .await
            .unwrap();
        let Updated::Changed { previous, current } = updated else {
            panic!("expected the price to change");
        };
        assert_eq!(previous.price, price("10.00"));
        assert_eq!(current.price, price("12.50"));

        let staged: Vec<String> =
            sqlx::query_scalar("SELECT topic FROM outbox_messages ORDER BY position")
                .fetch_all(&db)
                .await
                .unwrap();
        assert_eq!(staged, [topics::PRODUCT_UPDATED, topics::PRODUCT_PRICE_CHANGED]);
    }
}
