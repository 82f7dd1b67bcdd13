use sqlx::sqlite::SqlitePool;

use crate::password;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    /// Public identifier carried in tokens. The integer id never leaves the database layer.
    pub uuid: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub password_hash: String,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: String,
    email: String,
    first_name: String,
    last_name: String,
    is_active: i32,
    password_hash: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            is_active: row.is_active != 0,
            password_hash: row.password_hash,
        }
    }
}

/// Fields for a new, inactive account. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an inactive user inside an open transaction.
    pub async fn insert(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user: &NewUser<'_>,
        now: i64,
    ) -> Result<User, sqlx::Error> {
        let uuid = uuid::Uuid::new_v4().to_string();
        let email = user.email.trim().to_lowercase();
        let result = sqlx::query(
            "INSERT INTO users (uuid, email, password_hash, first_name, last_name, is_active, created_at) VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&uuid)
        .bind(&email)
        .bind(user.password_hash)
        .bind(user.first_name)
        .bind(user.last_name)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(User {
            id: result.last_insert_rowid(),
            uuid,
            email,
            first_name: user.first_name.to_string(),
            last_name: user.last_name.to_string(),
            is_active: false,
            password_hash: user.password_hash.to_string(),
        })
    }

    /// Create an inactive user outside of any transaction.
    pub async fn create(&self, user: &NewUser<'_>, now: i64) -> Result<User, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let created = Self::insert(&mut tx, user, now).await?;
        tx.commit().await?;
        Ok(created)
    }

    /// Get a user by email. Matching is case-insensitive.
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, uuid, email, first_name, last_name, is_active, password_hash FROM users WHERE email = ?",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, uuid, email, first_name, last_name, is_active, password_hash FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, uuid, email, first_name, last_name, is_active, password_hash FROM users WHERE uuid = ?")
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Check whether an email is already registered.
    pub async fn email_exists(&self, email: &str) -> Result<bool, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email.trim())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    /// Mark a user active. Returns false if the user was already active.
    #[cfg(test)]
    pub async fn activate(&self, id: i64) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let activated = Self::activate_in(&mut tx, id).await?;
        tx.commit().await?;
        Ok(activated)
    }

    /// Transactional form of `activate`, used when verifying an email code.
    pub async fn activate_in(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET is_active = 1 WHERE id = ? AND is_active = 0")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace a user's password hash inside an open transaction.
    pub async fn set_password_hash_in(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: i64,
        password_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Look up a user by email and check the password.
    ///
    /// Unknown emails and wrong passwords yield `None`. Inactive accounts are
    /// returned as-is; callers decide whether they may proceed.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>, sqlx::Error> {
        let Some(user) = self.get_by_email(email).await? else {
            return Ok(None);
        };
        if !password::verify(password, &user.password_hash) {
            return Ok(None);
        }
        Ok(Some(user))
    }
}
