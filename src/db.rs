use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sqlite::SqliteConnection;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::errors::{self, PimbinError};
use crate::schema::{files, pastes, users};

embed_migrations!();

pub const MAX_USERNAME_LEN: usize = 255;
pub const MAX_FILE_NAME_LEN: usize = 128;
const TOKEN_BYTES: usize = 24;
const TOKEN_ATTEMPTS: usize = 8;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

#[derive(Debug, Clone, PartialEq, Eq, Queryable)]
pub struct User {
    pub username: String,
    /// PHC string
    pub password: String,
    pub token: Option<String>,
}

#[derive(Insertable)]
#[table_name = "users"]
struct NewUser<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paste {
    pub id: String,
    pub owner: String,
    pub files: Vec<File>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub hash: String,
    pub name: String,
}

#[derive(Insertable)]
#[table_name = "pastes"]
struct NewPaste<'a> {
    id: &'a str,
    owner: &'a str,
}

#[derive(Insertable)]
#[table_name = "files"]
struct NewFile<'a> {
    paste: &'a str,
    position: i32,
    hash: &'a str,
    name: &'a str,
}

#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        // cascading deletes of files need foreign keys, which sqlite
        // enables per connection
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Open (or create) the database and bring its schema up to date.
pub fn connect(database_url: &str) -> errors::Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .connection_customizer(Box::new(SqlitePragmas))
        .build(manager)?;
    let conn = pool.get()?;
    embedded_migrations::run(&*conn)?;
    Ok(pool)
}

pub fn create_user(
    conn: &SqliteConnection,
    username: &str,
    password_hash: &str,
) -> errors::Result<User> {
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(PimbinError::Validation(format!(
            "username must be between 1 and {MAX_USERNAME_LEN} bytes"
        )));
    }

    conn.transaction::<_, PimbinError, _>(|| {
        if find_user(conn, username)?.is_some() {
            return Err(PimbinError::UserAlreadyExists(username.to_string()));
        }
        let new_user = NewUser {
            username,
            password: password_hash,
        };
        diesel::insert_into(users::table)
            .values(&new_user)
            .execute(conn)
            .map_err(|err| match err {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    PimbinError::UserAlreadyExists(username.to_string())
                }
                err => err.into(),
            })?;
        get_user(conn, username)
    })
}

pub fn list_users(conn: &SqliteConnection) -> errors::Result<Vec<User>> {
    let all = users::table
        .order(users::username.asc())
        .load::<User>(conn)?;
    Ok(all)
}

pub fn get_user(conn: &SqliteConnection, username: &str) -> errors::Result<User> {
    find_user(conn, username)?.ok_or_else(|| PimbinError::NotFound(format!("user {username}")))
}

fn find_user(conn: &SqliteConnection, username: &str) -> errors::Result<Option<User>> {
    let user = users::table
        .find(username)
        .first::<User>(conn)
        .optional()?;
    Ok(user)
}

pub fn update_password(
    conn: &SqliteConnection,
    username: &str,
    password_hash: &str,
) -> errors::Result<()> {
    let n = diesel::update(users::table.find(username))
        .set(users::password.eq(password_hash))
        .execute(conn)?;
    if n == 0 {
        return Err(PimbinError::NotFound(format!("user {username}")));
    }
    Ok(())
}

/// Replace the user's token with a fresh random one and return it. A
/// generated token that is already held by someone is thrown away.
pub fn refresh_token(conn: &SqliteConnection, username: &str) -> errors::Result<String> {
    conn.transaction::<_, PimbinError, _>(|| {
        get_user(conn, username)?;
        for _ in 0..TOKEN_ATTEMPTS {
            let token = generate_token();
            let holders: i64 = users::table
                .filter(users::token.eq(token.as_str()))
                .count()
                .get_result(conn)?;
            if holders > 0 {
                log::warn!("generated token collides with an existing one, retrying");
                continue;
            }
            diesel::update(users::table.find(username))
                .set(users::token.eq(Some(token.as_str())))
                .execute(conn)?;
            return Ok(token);
        }
        Err(anyhow!("could not generate a unique token for {username}").into())
    })
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    base64::encode_config(bytes, base64::URL_SAFE)
}

/// Insert the paste and its files, in order, as a single transaction.
pub fn put_paste(conn: &SqliteConnection, paste: &Paste) -> errors::Result<()> {
    conn.transaction::<_, PimbinError, _>(|| {
        let taken = pastes::table
            .find(paste.id.as_str())
            .select(pastes::id)
            .first::<String>(conn)
            .optional()?
            .is_some();
        if taken {
            return Err(PimbinError::PasteIdTaken(paste.id.clone()));
        }

        let new_paste = NewPaste {
            id: &paste.id,
            owner: &paste.owner,
        };
        diesel::insert_into(pastes::table)
            .values(&new_paste)
            .execute(conn)
            .map_err(|err| match err {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    PimbinError::PasteIdTaken(paste.id.clone())
                }
                err => err.into(),
            })?;

        for (position, file) in paste.files.iter().enumerate() {
            if file.name.len() > MAX_FILE_NAME_LEN {
                return Err(PimbinError::Validation(format!(
                    "file name longer than {MAX_FILE_NAME_LEN} bytes"
                )));
            }
            let new_file = NewFile {
                paste: &paste.id,
                position: position as i32,
                hash: &file.hash,
                name: &file.name,
            };
            diesel::insert_into(files::table)
                .values(&new_file)
                .execute(conn)?;
        }
        Ok(())
    })
}

pub fn get_paste(conn: &SqliteConnection, id: &str) -> errors::Result<Paste> {
    let owner = pastes::table
        .find(id)
        .select(pastes::owner)
        .first::<String>(conn)
        .optional()?
        .ok_or_else(|| PimbinError::NotFound(format!("paste {id}")))?;

    let files = files::table
        .filter(files::paste.eq(id))
        .order(files::position.asc())
        .select((files::hash, files::name))
        .load::<(String, String)>(conn)?
        .into_iter()
        .map(|(hash, name)| File { hash, name })
        .collect();

    Ok(Paste {
        id: id.to_string(),
        owner,
        files,
    })
}

/// Remove the paste; its files go with it. Blobs are left on disk.
pub fn delete_paste(conn: &SqliteConnection, id: &str) -> errors::Result<()> {
    let n = diesel::delete(pastes::table.find(id)).execute(conn)?;
    if n == 0 {
        return Err(PimbinError::NotFound(format!("paste {id}")));
    }
    Ok(())
}
