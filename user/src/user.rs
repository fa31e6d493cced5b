use common::correlation::correlation_id;
use common::db::Updated;
use common::error::DomainError;
use common::pagination::PageRequest;
use proto::user::{
    BulkCreateUsersRequest, BulkCreateUsersResponse, CreateUserRequest, CreateUserResponse,
    DeleteUserRequest, DeleteUserResponse, GetUserRequest, GetUserResponse, ListUsersRequest,
    ListUsersResponse, UpdateUserRequest, UpdateUserResponse, user_service_server::UserService,
};
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::domain::{self, User};
use crate::events;
use crate::repository::UserRepository;

pub struct UserServiceImpl<R> {
    repo: R,
}

impl<R: UserRepository> UserServiceImpl<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    async fn create(&self, name: &str, email: &str, correlation_id: &str) -> Result<User, DomainError> {
        let user = User::new(name, email)?;
        self.repo
            .create(&user, &[events::created(&user, correlation_id)])
            .await?;

        info!(user_id = %user.id, correlation_id = %correlation_id, "User created");
        Ok(user)
    }

    async fn find(&self, id: &str) -> Result<User, DomainError> {
        let id = domain::parse_id(id)?;
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found("user not found"))
    }
}

#[tonic::async_trait]
impl<R: UserRepository> UserService for UserServiceImpl<R> {
    async fn create_user(
        &self,
        request: Request<CreateUserRequest>,
    ) -> Result<Response<CreateUserResponse>, Status> {
        let correlation_id = correlation_id(&request);
        let req = request.into_inner();

        let user = self.create(&req.name, &req.email, &correlation_id).await?;

        Ok(Response::new(CreateUserResponse {
            user: Some(user.to_proto()),
        }))
    }

    async fn get_user(
        &self,
        request: Request<GetUserRequest>,
    ) -> Result<Response<GetUserResponse>, Status> {
        let user = self.find(&request.into_inner().id).await?;

        Ok(Response::new(GetUserResponse {
            user: Some(user.to_proto()),
        }))
    }

    async fn update_user(
        &self,
        request: Request<UpdateUserRequest>,
    ) -> Result<Response<UpdateUserResponse>, Status> {
        let correlation_id = correlation_id(&request);
        let req = request.into_inner();

        let id = domain::parse_id(&req.id)?;
        let outcome = self
            .repo
            .update_with(id, |current| {
                let Some((updated, changed)) = current.with_details(&req.name, &req.email)? else {
                    return Ok(None);
                };
                let event = events::updated(&updated, current, changed, &correlation_id);
                Ok(Some((updated, vec![event])))
            })
            .await?;

        let user = match outcome {
            Updated::Missing => return Err(DomainError::not_found("user not found").into()),
            Updated::Unchanged(user) => user,
            Updated::Changed { current, .. } => {
                info!(user_id = %current.id, correlation_id = %correlation_id, "User updated");
                current
            }
        };

        Ok(Response::new(UpdateUserResponse {
            user: Some(user.to_proto()),
        }))
    }

    async fn delete_user(
        &self,
        request: Request<DeleteUserRequest>,
    ) -> Result<Response<DeleteUserResponse>, Status> {
        let correlation_id = correlation_id(&request);
        let id = domain::parse_id(&request.into_inner().id)?;

        let removed = self
            .repo
            .delete_with(id, |user| vec![events::deleted(user, &correlation_id)])
            .await?
            .ok_or_else(|| DomainError::not_found("user not found"))?;

        info!(user_id = %removed.id, correlation_id = %correlation_id, "User deleted");
        Ok(Response::new(DeleteUserResponse {}))
    }

    async fn list_users(
        &self,
        request: Request<ListUsersRequest>,
    ) -> Result<Response<ListUsersResponse>, Status> {
        let req = request.into_inner();
        let page = PageRequest::parse(req.page_size, &req.page_token)?;
        let search = Some(req.search_query.trim()).filter(|q| !q.is_empty());

        let (rows, total) = self.repo.list(search, page).await?;
        let (users, next_page_token) = page.split(rows);

        Ok(Response::new(ListUsersResponse {
            users: users.iter().map(User::to_proto).collect(),
            next_page_token,
            total_count: i32::try_from(total).unwrap_or(i32::MAX),
        }))
    }

    async fn bulk_create_users(
        &self,
        request: Request<BulkCreateUsersRequest>,
    ) -> Result<Response<BulkCreateUsersResponse>, Status> {
        let correlation_id = correlation_id(&request);
        let req = request.into_inner();

        let mut users = Vec::with_capacity(req.users.len());
        let mut failed_emails = Vec::new();
        for item in req.users {
            match self.create(&item.name, &item.email, &correlation_id).await {
                Ok(user) => users.push(user.to_proto()),
                Err(e) => {
                    warn!(email = %item.email, error = %e, "Bulk create skipped user");
                    failed_emails.push(item.email);
                }
            }
        }

        info!(
            created = users.len(),
            failed = failed_emails.len(),
            "Bulk create finished"
        );
        Ok(Response::new(BulkCreateUsersResponse {
            users,
            failed_emails,
        }))
    }
}
