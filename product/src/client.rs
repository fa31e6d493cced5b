use proto::product::{
    BulkUpdatePricesRequest, CreateProductRequest, DeleteProductRequest, GetProductAnalyticsRequest,
    ListProductsRequest, PriceRange, PriceUpdate, UpdateProductRequest,
    product_service_client::ProductServiceClient,
};
use tonic::Request;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr =
        std::env::var("PRODUCT_SERVICE_URL").unwrap_or_else(|_| "http://127.0.0.1:50052".to_string());
    let mut client = ProductServiceClient::connect(addr).await?;

    println!("Connected to Product Service");
    println!("============================\n");

    // Test 1: Create a couple of products
    println!("1. Testing CreateProduct");
    let mut created = Vec::new();
    for (name, price) in [("Desk Lamp", "24.99"), ("Office Chair", "149.5")] {
        let mut request = Request::new(CreateProductRequest {
            name: name.to_string(),
            price: price.to_string(),
        });
        request
            .metadata_mut()
            .insert("x-correlation-id", "product-client-demo".parse()?);
        let product = client
            .create_product(request)
            .await?
            .into_inner()
            .product
            .ok_or("CreateProduct returned no product")?;
        println!("  Created {} ({}) at {}", product.name, product.id, product.price);
        created.push(product);
    }
    println!();

    // Test 2: Change the lamp's price
    println!("2. Testing UpdateProduct");
    let lamp = &created[0];
    let updated = client
        .update_product(UpdateProductRequest {
            id: lamp.id.clone(),
            name: lamp.name.clone(),
            price: "19.99".to_string(),
        })
        .await?
        .into_inner();
    if let Some(p) = &updated.product {
        println!("  {} now costs {}\n", p.name, p.price);
    }

    // Test 3: Filter by name and price
    println!("3. Testing ListProducts");
    let list = client
        .list_products(ListProductsRequest {
            page_size: 10,
            page_token: String::new(),
            search_query: "lamp".to_string(),
            price_range: Some(PriceRange {
                min_price: "10".to_string(),
                max_price: "50".to_string(),
            }),
        })
        .await?
        .into_inner();
    println!("  Total matching: {}", list.total_count);
    for p in &list.products {
        println!("  - {} at {}", p.name, p.price);
    }
    println!();

    // Test 4: Bulk price update with one unknown id
    println!("4. Testing BulkUpdatePrices");
    let bulk = client
        .bulk_update_prices(BulkUpdatePricesRequest {
            updates: vec![
                PriceUpdate {
                    id: created[1].id.clone(),
                    price: "129.00".to_string(),
                },
                PriceUpdate {
                    id: "00000000-0000-0000-0000-000000000000".to_string(),
                    price: "1.00".to_string(),
                },
            ],
        })
        .await?
        .into_inner();
    println!("  Updated: {}", bulk.updated_products.len());
    println!("  Failed ids: {:?}\n", bulk.failed_ids);

    // Test 5: Analytics
    println!("5. Testing GetProductAnalytics");
    let stats = client
        .get_product_analytics(GetProductAnalyticsRequest {})
        .await?
        .into_inner();
    println!("  Products: {}", stats.total_products);
    println!("  Average: {}", stats.average_price);
    println!("  Highest: {}", stats.highest_price);
    println!("  Lowest: {}\n", stats.lowest_price);

    // Test 6: Clean up
    println!("6. Testing DeleteProduct");
    for product in &created {
        client
            .delete_product(DeleteProductRequest {
                id: product.id.clone(),
            })
            .await?;
        println!("  Deleted {}", product.id);
    }

    println!("\n============================");
    println!("All tests completed!");

    Ok(())
}
