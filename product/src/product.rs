use common::correlation::correlation_id;
use common::db::Updated;
use common::error::DomainError;
use common::pagination::PageRequest;
use proto::product::{
    BulkUpdatePricesRequest, BulkUpdatePricesResponse, CreateProductRequest, CreateProductResponse,
    DeleteProductRequest, DeleteProductResponse, GetProductAnalyticsRequest,
    GetProductAnalyticsResponse, GetProductRequest, GetProductResponse, ListProductsRequest,
    ListProductsResponse, PriceRange, UpdateProductRequest, UpdateProductResponse,
    product_service_server::ProductService,
};
use sqlx::types::Decimal;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::domain::{self, Product};
use crate::events;
use crate::repository::{ProductFilter, ProductRepository};

pub struct ProductServiceImpl<R> {
    repo: R,
}

impl<R: ProductRepository> ProductServiceImpl<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    async fn find(&self, id: &str) -> Result<Product, DomainError> {
        let id = domain::parse_id(id)?;
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found("product not found"))
    }

    /// Applies `price`, and `name` when given, to the stored product. The
    /// change and its events are derived from the row as it is when locked.
    async fn update(
        &self,
        id: &str,
        name: Option<&str>,
        price: &str,
        correlation_id: &str,
    ) -> Result<Product, DomainError> {
        let id = domain::parse_id(id)?;
        let outcome = self
            .repo
            .update_with(id, |current| {
                let name = name.unwrap_or(current.name.as_str());
                let Some(change) = current.with_details(name, price)? else {
                    return Ok(None);
                };
                let messages = events::updated(&change, current, correlation_id);
                Ok(Some((change.product, messages)))
            })
            .await?;

        match outcome {
            Updated::Missing => Err(DomainError::not_found("product not found")),
            Updated::Unchanged(product) => Ok(product),
            Updated::Changed { previous, current } => {
                if previous.price != current.price {
                    info!(
                        product_id = %current.id,
                        previous_price = %previous.price,
                        new_price = %current.price,
                        correlation_id = %correlation_id,
                        "Product price changed"
                    );
                }
                info!(product_id = %current.id, correlation_id = %correlation_id, "Product updated");
                Ok(current)
            }
        }
    }
}

fn parse_filter(search_query: &str, range: Option<PriceRange>) -> Result<ProductFilter, DomainError> {
    let bound = |value: &str| -> Result<Option<Decimal>, DomainError> {
        if value.trim().is_empty() {
            Ok(None)
        } else {
            domain::parse_decimal(value).map(Some)
        }
    };

    let (min_price, max_price) = match range {
        Some(range) => (bound(&range.min_price)?, bound(&range.max_price)?),
        None => (None, None),
    };
    if let (Some(min), Some(max)) = (min_price, max_price) {
        if min > max {
            return Err(DomainError::validation("min_price must not exceed max_price"));
        }
    }

    Ok(ProductFilter {
        search: Some(search_query.trim())
            .filter(|q| !q.is_empty())
            .map(str::to_owned),
        min_price,
        max_price,
    })
}

fn price_or_zero(price: Option<Decimal>) -> String {
    price.map_or_else(|| "0".to_string(), |p| p.to_string())
}

#[tonic::async_trait]
impl<R: ProductRepository> ProductService for ProductServiceImpl<R> {
    async fn create_product(
        &self,
        request: Request<CreateProductRequest>,
    ) -> Result<Response<CreateProductResponse>, Status> {
        let correlation_id = correlation_id(&request);
        let req = request.into_inner();

        let product = Product::new(&req.name, &req.price)?;
        self.repo
            .create(&product, &[events::created(&product, &correlation_id)])
            .await?;

        info!(product_id = %product.id, correlation_id = %correlation_id, "Product created");
        Ok(Response::new(CreateProductResponse {
            product: Some(product.to_proto()),
        }))
    }

    async fn get_product(
        &self,
        request: Request<GetProductRequest>,
    ) -> Result<Response<GetProductResponse>, Status> {
        let product = self.find(&request.into_inner().id).await?;

        Ok(Response::new(GetProductResponse {
            product: Some(product.to_proto()),
        }))
    }

    async fn update_product(
        &self,
        request: Request<UpdateProductRequest>,
    ) -> Result<Response<UpdateProductResponse>, Status> {
        let correlation_id = correlation_id(&request);
        let req = request.into_inner();

        let product = self
            .update(&req.id, Some(&req.name), &req.price, &correlation_id)
            .await?;

        Ok(Response::new(UpdateProductResponse {
            product: Some(product.to_proto()),
        }))
    }

    async fn delete_product(
        &self,
        request: Request<DeleteProductRequest>,
    ) -> Result<Response<DeleteProductResponse>, Status> {
        let correlation_id = correlation_id(&request);
        let id = domain::parse_id(&request.into_inner().id)?;

        let removed = self
            .repo
            .delete_with(id, |product| vec![events::deleted(product, &correlation_id)])
            .await?
            .ok_or_else(|| DomainError::not_found("product not found"))?;

        info!(product_id = %removed.id, correlation_id = %correlation_id, "Product deleted");
        Ok(Response::new(DeleteProductResponse {}))
    }

    async fn list_products(
        &self,
        request: Request<ListProductsRequest>,
    ) -> Result<Response<ListProductsResponse>, Status> {
        let req = request.into_inner();
        let page = PageRequest::parse(req.page_size, &req.page_token)?;
        let filter = parse_filter(&req.search_query, req.price_range)?;

        let (rows, total) = self.repo.list(&filter, page).await?;
        let (products, next_page_token) = page.split(rows);

        Ok(Response::new(ListProductsResponse {
            products: products.iter().map(Product::to_proto).collect(),
            next_page_token,
            total_count: i32::try_from(total).unwrap_or(i32::MAX),
        }))
    }

    async fn bulk_update_prices(
        &self,
        request: Request<BulkUpdatePricesRequest>,
    ) -> Result<Response<BulkUpdatePricesResponse>, Status> {
        let correlation_id = correlation_id(&request);
        let req = request.into_inner();

        let mut updated_products = Vec::with_capacity(req.updates.len());
        let mut failed_ids = Vec::new();
        for update in req.updates {
            let result = self
                .update(&update.id, None, &update.price, &correlation_id)
                .await;
            match result {
                Ok(product) => updated_products.push(product.to_proto()),
                Err(e) => {
                    warn!(product_id = %update.id, error = %e, "Bulk price update skipped product");
                    failed_ids.push(update.id);
                }
            }
        }

        info!(
            updated = updated_products.len(),
            failed = failed_ids.len(),
            "Bulk price update finished"
        );
        Ok(Response::new(BulkUpdatePricesResponse {
            updated_products,
            failed_ids,
        }))
    }

    async fn get_product_analytics(
        &self,
        _request: Request<GetProductAnalyticsRequest>,
    ) -> Result<Response<GetProductAnalyticsResponse>, Status> {
        let stats = self.repo.stats().await?;

        Ok(Response::new(GetProductAnalyticsResponse {
            total_products: i32::try_from(stats.total).unwrap_or(i32::MAX),
            average_price: price_or_zero(stats.average),
            highest_price: price_or_zero(stats.highest),
            lowest_price: price_or_zero(stats.lowest),
        }))
    }
}
