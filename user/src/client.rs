use proto::user::{
    BulkCreateUsersRequest, CreateUserRequest, DeleteUserRequest, GetUserRequest, ListUsersRequest,
    UpdateUserRequest, user_service_client::UserServiceClient,
};
use tonic::Request;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::var("USER_SERVICE_URL").unwrap_or_else(|_| "http://127.0.0.1:50051".to_string());
    let mut client = UserServiceClient::connect(addr).await?;

    println!("Connected to User Service");
    println!("=========================\n");

    // Test 1: Create a user
    println!("1. Testing CreateUser");
    let mut request = Request::new(CreateUserRequest {
        name: "John Doe".to_string(),
        email: format!("john+{}@example.com", std::process::id()),
    });
    request
        .metadata_mut()
        .insert("x-correlation-id", "user-client-demo".parse()?);
    let user = client
        .create_user(request)
        .await?
        .into_inner()
        .user
        .ok_or("CreateUser returned no user")?;
    println!("Created User:");
    println!("  ID: {}", user.id);
    println!("  Name: {}", user.name);
    println!("  Email: {}\n", user.email);

    // Test 2: Get the user back
    println!("2. Testing GetUser");
    let fetched = client
        .get_user(GetUserRequest { id: user.id.clone() })
        .await?
        .into_inner();
    if let Some(u) = &fetched.user {
        println!("  Found: {} <{}>\n", u.name, u.email);
    }

    // Test 3: Update the name
    println!("3. Testing UpdateUser");
    let updated = client
        .update_user(UpdateUserRequest {
            id: user.id.clone(),
            name: "John Q. Doe".to_string(),
            email: user.email.clone(),
        })
        .await?
        .into_inner();
    if let Some(u) = &updated.user {
        println!("  Updated name: {}\n", u.name);
    }

    // Test 4: Bulk create, one of them invalid
    println!("4. Testing BulkCreateUsers");
    let bulk = client
        .bulk_create_users(BulkCreateUsersRequest {
            users: vec![
                CreateUserRequest {
                    name: "Jane Roe".to_string(),
                    email: format!("jane+{}@example.com", std::process::id()),
                },
                CreateUserRequest {
                    name: "Broken".to_string(),
                    email: "not-an-email".to_string(),
                },
            ],
        })
        .await?
        .into_inner();
    println!("  Created: {}", bulk.users.len());
    println!("  Failed emails: {:?}\n", bulk.failed_emails);

    // Test 5: List with search
    println!("5. Testing ListUsers");
    let list = client
        .list_users(ListUsersRequest {
            page_size: 10,
            page_token: String::new(),
            search_query: "doe".to_string(),
        })
        .await?
        .into_inner();
    println!("  Total matching: {}", list.total_count);
    for u in &list.users {
        println!("  - {} <{}>", u.name, u.email);
    }
    println!("  Next page token: {:?}\n", list.next_page_token);

    // Test 6: Delete
    println!("6. Testing DeleteUser");
    client
        .delete_user(DeleteUserRequest { id: user.id.clone() })
        .await?;
    match client.get_user(GetUserRequest { id: user.id }).await {
        Ok(_) => println!("  User still present"),
        Err(status) => println!("  Deleted, GetUser now returns {:?}", status.code()),
    }

    println!("\n=========================");
    println!("All tests completed!");

    Ok(())
}
