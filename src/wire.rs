use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
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
use tokio::net::TcpStream;

use crate::engine::{enumerate_slots, Engine, EngineError, ErrorKind};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, ResultShape, SqlError};
use crate::tenant::TenantManager;

// ── Auth ─────────────────────────────────────────────────────────

/// Single shared password for every user and school.
#[derive(Debug)]
pub struct ClassbookAuthSource {
    password: String,
}

impl ClassbookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ClassbookAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Handler ──────────────────────────────────────────────────────

pub struct ClassbookHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<ClassbookQueryParser>,
}

impl ClassbookHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(ClassbookQueryParser),
        }
    }

    async fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).await.map_err(|e| {
            user_error("08006", format!("school {db:?} unavailable: {e}"))
        })
    }

    async fn run_query(&self, engine: &Engine, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertRoom {
                id,
                name,
                equipment,
            } => {
                engine
                    .create_room(id, name, equipment)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SelectRooms => {
                let rooms = engine.list_rooms().await;
                Ok(query_response(rooms_schema(), rooms, |enc, room| {
                    enc.encode_field(&room.id.to_string())?;
                    enc.encode_field(&room.name)?;
                    enc.encode_field(&room.equipment)
                }))
            }
            Command::UpsertSetting { key, value } => {
                let key = setting_key(&key)?;
                engine.update_setting(key, value).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SelectSettings { key } => {
                let entries = match key {
                    Some(key) => {
                        let key = setting_key(&key)?;
                        vec![(key, engine.get_setting(key))]
                    }
                    None => engine.list_settings(),
                };
                Ok(query_response(settings_schema(), entries, |enc, (key, value)| {
                    enc.encode_field(&key.to_string())?;
                    enc.encode_field(&value)
                }))
            }
            Command::SelectSlots { duration } => {
                let slots = match duration {
                    Some(d) => enumerate_slots(&engine.working_hours(), d),
                    None => engine.current_slots(),
                };
                Ok(query_response(slots_schema(), slots, |enc, slot| {
                    enc.encode_field(&slot.span.start.to_string())?;
                    enc.encode_field(&slot.span.end.to_string())?;
                    enc.encode_field(&slot.label)
                }))
            }
            Command::SelectAvailability {
                room_id,
                date,
                start,
                end,
            } => {
                let end = match end {
                    Some(end) => end,
                    None => engine.current_end_time(start).map_err(engine_err)?,
                };
                let available = engine
                    .is_available(room_id, date, start, end)
                    .await
                    .map_err(engine_err)?;
                let row = [(room_id, date, start, end, available)];
                Ok(query_response(
                    availability_schema(),
                    row,
                    |enc, (room_id, date, start, end, available)| {
                        enc.encode_field(&room_id.to_string())?;
                        enc.encode_field(&date.to_string())?;
                        enc.encode_field(&start.to_string())?;
                        enc.encode_field(&end.to_string())?;
                        enc.encode_field(&available)
                    },
                ))
            }
            Command::InsertBooking(req) => {
                let booking = engine.create_booking(req).await.map_err(engine_err)?;
                Ok(bookings_response(vec![booking]))
            }
            Command::InsertStatusChange { booking_id, status } => {
                engine
                    .set_booking_status(booking_id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteBooking { id, requester_id } => {
                engine
                    .cancel_booking(id, requester_id)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBookings { filter } => {
                Ok(bookings_response(engine.list_bookings(&filter).await))
            }
        }
    }
}

fn setting_key(key: &str) -> PgWireResult<SettingKey> {
    key.parse()
        .map_err(|k| engine_err(EngineError::UnknownSetting(k)))
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn rooms_schema() -> Vec<FieldInfo> {
    ["id", "name", "equipment"].into_iter().map(text_field).collect()
}

fn settings_schema() -> Vec<FieldInfo> {
    ["key", "value"].into_iter().map(text_field).collect()
}

fn slots_schema() -> Vec<FieldInfo> {
    ["start", "end", "label"].into_iter().map(text_field).collect()
}

fn availability_schema() -> Vec<FieldInfo> {
    let mut fields: Vec<_> = ["room_id", "date", "start", "end"]
        .into_iter()
        .map(text_field)
        .collect();
    fields.push(FieldInfo::new(
        "available".into(),
        None,
        None,
        Type::BOOL,
        FieldFormat::Text,
    ));
    fields
}

fn bookings_schema() -> Vec<FieldInfo> {
    [
        "id",
        "room_id",
        "requester_id",
        "date",
        "start",
        "end",
        "equipment",
        "status",
    ]
    .into_iter()
    .map(text_field)
    .collect()
}

fn schema_for(shape: ResultShape) -> Vec<FieldInfo> {
    match shape {
        ResultShape::Rooms => rooms_schema(),
        ResultShape::Settings => settings_schema(),
        ResultShape::Slots => slots_schema(),
        ResultShape::Availability => availability_schema(),
        ResultShape::Bookings => bookings_schema(),
        ResultShape::None => vec![],
    }
}

fn query_response<T>(
    fields: Vec<FieldInfo>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(fields);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn bookings_response(bookings: Vec<Booking>) -> Response {
    query_response(bookings_schema(), bookings, |enc, b| {
        enc.encode_field(&b.id.to_string())?;
        enc.encode_field(&b.room_id.to_string())?;
        enc.encode_field(&b.requester_id.to_string())?;
        enc.encode_field(&b.date.to_string())?;
        enc.encode_field(&b.span.start.to_string())?;
        enc.encode_field(&b.span.end.to_string())?;
        enc.encode_field(&b.equipment)?;
        enc.encode_field(&b.status.to_string())
    })
}

#[async_trait]
impl SimpleQueryHandler for ClassbookHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client).await?;
        Ok(vec![self.run_query(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ClassbookQueryParser;

#[async_trait]
impl QueryParser for ClassbookQueryParser {
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
        Ok(schema_for(sql::result_shape(stmt)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ClassbookHandler {
    type Statement = String;
    type QueryParser = ClassbookQueryParser;

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
        let engine = self.resolve_engine(client).await?;
        let sql = substitute_params(portal);
        self.run_query(&engine, &sql).await
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
            schema_for(sql::result_shape(&target.statement)),
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
        Ok(DescribePortalResponse::new(schema_for(sql::result_shape(
            &target.statement.statement,
        ))))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals. Highest index first so
/// `$1` does not clobber `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ClassbookFactory {
    handler: Arc<ClassbookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<ClassbookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ClassbookFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(ClassbookHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                ClassbookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ClassbookFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = ClassbookFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory)
        .await
        .map_err(|e| io::Error::other(e.to_string()))
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for an engine failure.
pub fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::AlreadyExists(_) | EngineError::DuplicateRoomName(_) => "23505",
        _ => match e.kind() {
            ErrorKind::Validation => "22023",
            ErrorKind::Conflict => "23P01",
            ErrorKind::NotFound => "P0002",
            ErrorKind::Limit => "54000",
            ErrorKind::Internal => "XX000",
        },
    }
}

/// SQLSTATE for a statement the server could not turn into a command.
pub fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::Invalid(_) => "22023",
        SqlError::UnknownTable(_) => "42P01",
        _ => "42601",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.kind() == ErrorKind::Internal {
        tracing::error!("engine failure: {e}");
    }
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(sql_sqlstate(&e), e.to_string())
}
