use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::process_socket;
use tokio::net::TcpStream;

use crate::auth::RoomdAuthSource;
use crate::engine::{BookingFilter, Engine, EngineError};
use crate::model::*;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct RoomdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<RoomdQueryParser>,
}

impl RoomdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(RoomdQueryParser),
        }
    }

    /// Tenant = the `database` the client connected to.
    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Actor = the startup `user`, resolved against the tenant directory.
    /// Reads run without one; mutations fail if the login is unknown.
    fn resolve_actor<C: ClientInfo>(&self, client: &C, engine: &Engine) -> (String, Option<User>) {
        let login = client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_default();
        let user = engine.find_user_by_username(&login);
        (login, user)
    }

    async fn run_command(
        &self,
        engine: &Engine,
        login: &str,
        actor: Option<&User>,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = crate::observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, login, actor, cmd).await;
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        login: &str,
        actor: Option<&User>,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let actor_id = |actor: Option<&User>| -> PgWireResult<UserId> {
            actor.map(|u| u.id).ok_or_else(|| {
                PgWireError::UserError(Box::new(ErrorInfo::new(
                    "ERROR".into(),
                    "28000".into(),
                    format!("unknown user: {login}"),
                )))
            })
        };

        match cmd {
            Command::InsertUser {
                id,
                username,
                email,
                role,
            } => {
                engine
                    .create_user(actor_id(actor)?, id, username, email, role)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteUser { id } => {
                engine
                    .delete_user(actor_id(actor)?, id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertRoom { id, number } => {
                engine
                    .create_room(actor_id(actor)?, id, number)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteRoom { id } => {
                engine
                    .delete_room(actor_id(actor)?, id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking {
                id,
                room_id,
                date,
                start,
                end,
                purpose,
                faculty_email,
            } => {
                engine
                    .create_booking(
                        id,
                        room_id,
                        actor_id(actor)?,
                        date,
                        start,
                        end,
                        purpose,
                        faculty_email,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::ApproveBooking { id } => {
                engine
                    .approve_booking(id, actor_id(actor)?)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::RejectBooking { id, reason } => {
                engine
                    .reject_booking(id, actor_id(actor)?, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CancelBooking { id } => {
                engine
                    .cancel_booking(id, actor_id(actor)?)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DestroyBooking { id } => {
                engine
                    .destroy_booking(id, actor_id(actor)?)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectBookings {
                room_id,
                date,
                status,
                requester,
            } => {
                let filter = BookingFilter {
                    room_id,
                    date,
                    status,
                    requester,
                };
                let bookings = engine.list_bookings(&filter).await;
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| encode_booking_row(schema.clone(), &b))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectRooms => {
                let rooms = engine.list_rooms();
                let schema = Arc::new(rooms_schema());
                let rows: Vec<PgWireResult<_>> = rooms
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.number)?;
                        encoder.encode_field(&(r.booking_count as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectUsers => {
                let users = engine.list_users();
                let schema = Arc::new(users_schema());
                let rows: Vec<PgWireResult<_>> = users
                    .into_iter()
                    .map(|u| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&u.id.to_string())?;
                        encoder.encode_field(&u.username)?;
                        encoder.encode_field(&u.email)?;
                        encoder.encode_field(&u.role.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }
}

fn bookings_schema() -> Vec<FieldInfo> {
    let varchar = |name: &str| {
        FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
    };
    vec![
        varchar("id"),
        varchar("room_id"),
        varchar("requester"),
        varchar("date"),
        varchar("start_time"),
        varchar("end_time"),
        varchar("status"),
        varchar("purpose"),
        varchar("faculty_email"),
        varchar("rejection_reason"),
        varchar("decided_by"),
        FieldInfo::new("decided_at".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("created_at".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("number".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "booking_count".into(),
            None,
            None,
            Type::INT8,
            FieldFormat::Text,
        ),
    ]
}

fn users_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("username".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("email".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("role".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn encode_booking_row(
    schema: Arc<Vec<FieldInfo>>,
    b: &Booking,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema);
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.room_id.to_string())?;
    encoder.encode_field(&b.requester.to_string())?;
    encoder.encode_field(&b.date.to_string())?;
    encoder.encode_field(&b.span.start.to_string())?;
    encoder.encode_field(&b.span.end.to_string())?;
    encoder.encode_field(&b.status.as_str())?;
    encoder.encode_field(&b.purpose)?;
    encoder.encode_field(&b.faculty_email)?;
    encoder.encode_field(&b.rejection_reason)?;
    encoder.encode_field(&b.decided_by.map(|u| u.to_string()))?;
    encoder.encode_field(&b.decided_at)?;
    encoder.encode_field(&b.created_at)?;
    Ok(encoder.take_row())
}

#[async_trait]
impl SimpleQueryHandler for RoomdHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let (login, actor) = self.resolve_actor(client, &engine);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run_command(&engine, &login, actor.as_ref(), cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomdQueryParser;

#[async_trait]
impl QueryParser for RoomdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(select_schema(stmt).unwrap_or_default())
    }
}

/// Result schema for a SELECT statement, by table name in the raw SQL.
fn select_schema(stmt: &str) -> Option<Vec<FieldInfo>> {
    let upper = stmt.to_uppercase();
    if !upper.contains("SELECT") {
        return None;
    }
    if upper.contains("BOOKINGS") {
        Some(bookings_schema())
    } else if upper.contains("ROOMS") {
        Some(rooms_schema())
    } else if upper.contains("USERS") {
        Some(users_schema())
    } else {
        None
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomdHandler {
    type Statement = String;
    type QueryParser = RoomdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let (login, actor) = self.resolve_actor(client, &engine);
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run_command(&engine, &login, actor.as_ref(), cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            select_schema(&target.statement).unwrap_or_default(),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(
            select_schema(&target.statement.statement).unwrap_or_default(),
        ))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory & connection entry point ─────────────────────────────

pub struct RoomdFactory {
    handler: Arc<RoomdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<RoomdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RoomdFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = RoomdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomdHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = Arc::new(RoomdFactory::new(tenant_manager, password));
    process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::SlotConflict(_) => "23P01",
        EngineError::TimeRangeInvalid { .. } => "23514",
        EngineError::Forbidden(_) => "42501",
        EngineError::NotFound(_) => "P0002",
        _ => "P0001",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
