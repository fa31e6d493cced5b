use async_trait::async_trait;
use common::db::Updated;
use common::error::{DomainError, is_unique_violation};
use common::pagination::{PageRequest, contains_pattern};
use outbox::{Message, PgMessageStore};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::User;

/// User storage. Every write stages its event messages in the same
/// transaction as the row change.
#[async_trait]
pub trait UserRepository: Send + Sync + 'static {
    async fn create(&self, user: &User, events: &[Message]) -> Result<(), DomainError>;

    async fn get(&self, id: Uuid) -> Result<Option<User>, DomainError>;

    /// Locks the user and hands the stored row to `apply`, which returns the
    /// replacement and the events describing it, or `None` to leave the row
    /// as it is. Concurrent updates of one user are serialized.
    async fn update_with<F>(&self, id: Uuid, apply: F) -> Result<Updated<User>, DomainError>
    where
        F: FnOnce(&User) -> Result<Option<(User, Vec<Message>)>, DomainError> + Send;

    /// Removes the user and stages the events `staged` builds from the
    /// removed row. `None` when there was no such user.
    async fn delete_with<F>(&self, id: Uuid, staged: F) -> Result<Option<User>, DomainError>
    where
        F: FnOnce(&User) -> Vec<Message> + Send;

    /// Newest first, `page.fetch_limit()` rows at most, plus the size of the
    /// filtered set.
    async fn list(
        &self,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<(Vec<User>, i64), DomainError>;
}

fn email_taken(e: sqlx::Error, email: &str) -> DomainError {
    if is_unique_violation(&e) {
        DomainError::conflict(format!("user with email {email} already exists"))
    } else {
        e.into()
    }
}

pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: &User, events: &[Message]) -> Result<(), DomainError> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO users (id, name, email, created_at, updated_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| email_taken(e, &user.email))?;

        PgMessageStore::append_in(&mut *tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>, DomainError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, email, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn update_with<F>(&self, id: Uuid, apply: F) -> Result<Updated<User>, DomainError>
    where
        F: FnOnce(&User) -> Result<Option<(User, Vec<Message>)>, DomainError> + Send,
    {
        let mut tx = self.db.begin().await?;

        let current = sqlx::query_as::<_, User>(
            "SELECT id, name, email, created_at, updated_at FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(current) = current else {
            return Ok(Updated::Missing);
        };
        let Some((user, events)) = apply(&current)? else {
            return Ok(Updated::Unchanged(current));
        };

        sqlx::query("UPDATE users SET name = $2, email = $3, updated_at = $4 WHERE id = $1")
            .bind(user.id)
            .bind(&user.name)
            .bind(&user.email)
            .bind(user.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| email_taken(e, &user.email))?;

        PgMessageStore::append_in(&mut *tx, &events).await?;
        tx.commit().await?;
        Ok(Updated::Changed {
            previous: current,
            current: user,
        })
    }

    async fn delete_with<F>(&self, id: Uuid, staged: F) -> Result<Option<User>, DomainError>
    where
        F: FnOnce(&User) -> Vec<Message> + Send,
    {
        let mut tx = self.db.begin().await?;

        let removed = sqlx::query_as::<_, User>(
            "DELETE FROM users WHERE id = $1 RETURNING id, name, email, created_at, updated_at",
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
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<(Vec<User>, i64), DomainError> {
        let (users, total) = match search {
            Some(query) => {
                let pattern = contains_pattern(query);
                let users = sqlx::query_as::<_, User>(
                    "SELECT id, name, email, created_at, updated_at FROM users
                     WHERE name ILIKE $1 OR email ILIKE $1
                     ORDER BY created_at DESC, id
                     LIMIT $2 OFFSET $3",
                )
                .bind(&pattern)
                .bind(page.fetch_limit())
                .bind(page.offset)
                .fetch_all(&self.db)
                .await?;

                let total: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE name ILIKE $1 OR email ILIKE $1")
                        .bind(&pattern)
                        .fetch_one(&self.db)
                        .await?;
                (users, total)
            }
            None => {
                let users = sqlx::query_as::<_, User>(
                    "SELECT id, name, email, created_at, updated_at FROM users
                     ORDER BY created_at DESC, id
                     LIMIT $1 OFFSET $2",
                )
                .bind(page.fetch_limit())
                .bind(page.offset)
                .fetch_all(&self.db)
                .await?;

                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
                    .fetch_one(&self.db)
                    .await?;
                (users, total)
            }
        };
        Ok((users, total))
    }
}

#[cfg(test)]
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Arc;

    use outbox::{MemoryMessageStore, MessageStore};
    use tokio::sync::Mutex;

    use super::*;

    /// Keeps users in a map and events in a [`MemoryMessageStore`]. The map
    /// lock is held until a write's events are staged, like the row lock.
    #[derive(Default)]
    pub struct MemoryUserRepository {
        users: Mutex<HashMap<Uuid, User>>,
        pub outbox: Arc<MemoryMessageStore>,
    }

    impl MemoryUserRepository {
        fn check_email(users: &HashMap<Uuid, User>, user: &User) -> Result<(), DomainError> {
            if users.values().any(|u| u.id != user.id && u.email == user.email) {
                return Err(DomainError::conflict(format!(
                    "user with email {} already exists",
                    user.email
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl UserRepository for MemoryUserRepository {
        async fn create(&self, user: &User, events: &[Message]) -> Result<(), DomainError> {
            let mut users = self.users.lock().await;
            Self::check_email(&users, user)?;
            users.insert(user.id, user.clone());
            self.outbox.append(events).await?;
            Ok(())
        }

        async fn get(&self, id: Uuid) -> Result<Option<User>, DomainError> {
            Ok(self.users.lock().await.get(&id).cloned())
        }

        async fn update_with<F>(&self, id: Uuid, apply: F) -> Result<Updated<User>, DomainError>
        where
            F: FnOnce(&User) -> Result<Option<(User, Vec<Message>)>, DomainError> + Send,
        {
            let mut users = self.users.lock().await;
            let Some(current) = users.get(&id).cloned() else {
                return Ok(Updated::Missing);
            };
            let Some((user, events)) = apply(&current)? else {
                return Ok(Updated::Unchanged(current));
            };
            Self::check_email(&users, &user)?;
            users.insert(id, user.clone());
            self.outbox.append(&events).await?;
            Ok(Updated::Changed {
                previous: current,
                current: user,
            })
        }

        async fn delete_with<F>(&self, id: Uuid, staged: F) -> Result<Option<User>, DomainError>
        where
            F: FnOnce(&User) -> Vec<Message> + Send,
        {
            let mut users = self.users.lock().await;
            let Some(removed) = users.remove(&id) else {
                return Ok(None);
            };
            self.outbox.append(&staged(&removed)).await?;
            Ok(Some(removed))
        }

        async fn list(
            &self,
            search: Option<&str>,
            page: PageRequest,
        ) -> Result<(Vec<User>, i64), DomainError> {
            let needle = search.map(str::to_lowercase);
            let mut users: Vec<User> = self
                .users
                .lock()
                .await
                .values()
                .filter(|u| match &needle {
                    Some(n) => u.name.to_lowercase().contains(n) || u.email.to_lowercase().contains(n),
                    None => true,
                })
                .cloned()
                .collect();
            users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

            let total = users.len() as i64;
            let page = users
                .into_iter()
                .skip(page.offset as usize)
                .take(page.fetch_limit() as usize)
                .collect();
            Ok((page, total))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use outbox::{Metadata, topics};
    use proto::event::UserUpdatedEvent;
    use sqlx::types::Json;

    use super::*;
    use crate::events;

    /// Staged messages on `topic` in insertion order, read straight from the
    /// table so open transactions elsewhere do not hide them.
    async fn staged(db: &PgPool, topic: &str) -> Vec<Message> {
        sqlx::query_as::<_, (Uuid, String, Vec<u8>, Json<Metadata>)>(
            "SELECT uuid, topic, payload, metadata FROM outbox_messages
             WHERE topic = $1 ORDER BY position",
        )
        .bind(topic)
        .fetch_all(db)
        .await
        .unwrap()
        .into_iter()
        .map(|(uuid, topic, payload, metadata)| Message {
            uuid,
            topic,
            payload,
            metadata: metadata.0,
        })
        .collect()
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn duplicate_email_stages_nothing(db: PgPool) {
        let repo = PgUserRepository::new(db.clone());
        let ada = User::new("Ada", "ada@example.com").unwrap();
        repo.create(&ada, &[events::created(&ada, "c-1")]).await.unwrap();

        let twin = User::new("Twin", "ada@example.com").unwrap();
        let err = repo
            .create(&twin, &[events::created(&twin, "c-2")])
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Conflict(_)));
        assert!(repo.get(twin.id).await.unwrap().is_none());
        let messages = staged(&db, topics::USER_CREATED).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].correlation_id(), Some("c-1"));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn create_rolls_back_when_staging_fails(db: PgPool) {
        let repo = PgUserRepository::new(db.clone());
        let ada = User::new("Ada", "ada@example.com").unwrap();
        // Longer than the topic column allows.
        let unstorable = Message::new("t".repeat(300), Vec::new());

        assert!(repo.create(&ada, &[unstorable]).await.is_err());
        assert!(repo.get(ada.id).await.unwrap().is_none());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn update_to_taken_email_keeps_row_and_stages_nothing(db: PgPool) {
        let repo = PgUserRepository::new(db.clone());
        let ada = User::new("Ada", "ada@example.com").unwrap();
        let bob = User::new("Bob", "bob@example.com").unwrap();
        repo.create(&ada, &[]).await.unwrap();
        repo.create(&bob, &[]).await.unwrap();

        let err = repo
            .update_with(bob.id, |current| {
                let Some((updated, changed)) = current.with_details("Bob", "ada@example.com")? else {
                    return Ok(None);
                };
                let event = events::updated(&updated, current, changed, "c-1");
                Ok(Some((updated, vec![event])))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(repo.get(bob.id).await.unwrap().unwrap().email, "bob@example.com");
        assert!(staged(&db, topics::USER_UPDATED).await.is_empty());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn concurrent_updates_are_serialized_by_row_lock(db: PgPool) {
        let repo = Arc::new(PgUserRepository::new(db.clone()));
        let ada = User::new("Ada", "ada@example.com").unwrap();
        repo.create(&ada, &[]).await.unwrap();
        let id = ada.id;

        let mut tasks = Vec::new();
        for i in 0..6 {
            let repo = repo.clone();
            tasks.push(tokio::spawn(async move {
                repo.update_with(id, move |current| {
                    let email = format!("ada{i}@example.com");
                    let Some((updated, changed)) = current.with_details("Ada", &email)? else {
                        return Ok(None);
                    };
                    let event = events::updated(&updated, current, changed, "c-1");
                    Ok(Some((updated, vec![event])))
                })
                .await
            }));
        }
        for task in tasks {
            assert!(matches!(task.await.unwrap().unwrap(), Updated::Changed { .. }));
        }

        let messages = staged(&db, topics::USER_UPDATED).await;
        assert_eq!(messages.len(), 6);
        let mut expected_previous = "ada@example.com".to_string();
        for message in &messages {
            let event: UserUpdatedEvent = message.decode().unwrap();
            let previous = event.data.as_ref().unwrap().previous_user.as_ref().unwrap();
            assert_eq!(previous.email, expected_previous);
            expected_previous = event.user.as_ref().unwrap().email.clone();
        }
        assert_eq!(repo.get(id).await.unwrap().unwrap().email, expected_previous);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn delete_stages_the_removed_row(db: PgPool) {
        let repo = PgUserRepository::new(db.clone());
        let ada = User::new("Ada", "ada@example.com").unwrap();
        repo.create(&ada, &[]).await.unwrap();

        let removed = repo
            .delete_with(ada.id, |user| vec![events::deleted(user, "c-1")])
            .await
            .unwrap();
        assert_eq!(removed.map(|u| u.email).as_deref(), Some("ada@example.com"));
        assert!(repo.delete_with(ada.id, |_| Vec::new()).await.unwrap().is_none());
        assert_eq!(staged(&db, topics::USER_DELETED).await.len(), 1);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn list_filters_by_name_or_email(db: PgPool) {
        let repo = PgUserRepository::new(db);
        for (name, email) in [("Ada", "ada@example.com"), ("Bob", "bob@lovelace.org")] {
            repo.create(&User::new(name, email).unwrap(), &[]).await.unwrap();
        }
        let page = PageRequest { limit: 10, offset: 0 };

        let (all, total) = repo.list(None, page).await.unwrap();
        assert_eq!((all.len(), total), (2, 2));

        let (found, total) = repo.list(Some("LOVELACE"), page).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(found[0].name, "Bob");
    }
}
