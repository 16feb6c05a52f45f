use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use tokio::net::TcpStream;

use crate::auth::CreneauAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct CreneauHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<CreneauQueryParser>,
}

impl CreneauHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(CreneauQueryParser),
        }
    }

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

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertBusiness {
                id,
                name,
                buffer_minutes,
                min_notice_hours,
                slot_minutes,
            } => {
                let defaults = SchedulingConfig::default();
                let config = SchedulingConfig {
                    buffer_minutes: buffer_minutes.unwrap_or(defaults.buffer_minutes),
                    min_notice_hours: min_notice_hours.unwrap_or(defaults.min_notice_hours),
                    slot_minutes: slot_minutes.unwrap_or(defaults.slot_minutes),
                };
                engine
                    .create_business(id, name, config)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateBusiness {
                id,
                name,
                buffer_minutes,
                min_notice_hours,
                slot_minutes,
            } => {
                engine
                    .update_business(id, name, buffer_minutes, min_notice_hours, slot_minutes)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteBusiness { id } => {
                engine.delete_business(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertHours {
                business_id,
                day_of_week,
                hours,
            } => {
                engine
                    .set_hours(business_id, day_of_week, hours)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteHours {
                business_id,
                day_of_week,
            } => {
                engine
                    .clear_hours(business_id, day_of_week)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertService {
                business_id,
                service,
            } => {
                engine
                    .add_service(business_id, service)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteService { id } => {
                engine.remove_service(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertAddOn {
                business_id,
                add_on,
            } => {
                engine
                    .add_add_on(business_id, add_on)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteAddOn { id } => {
                engine.remove_add_on(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertQuestion {
                business_id,
                question,
            } => {
                engine
                    .add_question(business_id, question)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteQuestion { id } => {
                engine.remove_question(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking { request } => {
                engine.create_booking(request).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateBookingStatus { id, status } => {
                engine
                    .set_booking_status(id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectAvailability {
                business_id,
                date,
                duration,
            } => {
                let slots = engine
                    .availability(business_id, date, duration)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.time())?;
                        encoder.encode_field(&slot.available)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBusinesses => {
                let schema = Arc::new(businesses_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_businesses()
                    .await
                    .into_iter()
                    .map(|info| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&info.id.to_string())?;
                        encoder.encode_field(&info.name)?;
                        encoder.encode_field(&info.config.buffer_minutes)?;
                        encoder.encode_field(&info.config.min_notice_hours)?;
                        encoder.encode_field(&info.config.slot_minutes)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectServices { business_id } => {
                let services = engine.get_services(business_id).await.map_err(engine_err)?;
                let schema = Arc::new(services_schema());
                let business = business_id.to_string();
                let rows: Vec<PgWireResult<_>> = services
                    .into_iter()
                    .map(|service| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&service.id.to_string())?;
                        encoder.encode_field(&business)?;
                        encoder.encode_field(&service.name)?;
                        encoder.encode_field(&service.duration_minutes)?;
                        encoder.encode_field(&service.price_cents)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { business_id, date } => {
                let bookings = engine
                    .get_bookings(business_id, date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|booking| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&booking.id.to_string())?;
                        encoder.encode_field(&booking.service_id.to_string())?;
                        encoder.encode_field(&booking.contact.name)?;
                        encoder.encode_field(&booking.contact.email)?;
                        encoder.encode_field(&booking.contact.phone)?;
                        encoder.encode_field(&booking.date.to_string())?;
                        encoder.encode_field(&minutes_to_hhmm(booking.start))?;
                        encoder.encode_field(&booking.duration)?;
                        encoder.encode_field(&booking.total_price_cents)?;
                        encoder.encode_field(&booking.status.as_str())?;
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

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("time"),
        FieldInfo::new("available".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn businesses_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        int8_field("buffer_minutes"),
        int8_field("min_notice_hours"),
        int8_field("slot_minutes"),
    ]
}

fn services_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("business_id"),
        text_field("name"),
        int8_field("duration_minutes"),
        int8_field("price_cents"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("service_id"),
        text_field("client_name"),
        text_field("client_email"),
        text_field("client_phone"),
        text_field("date"),
        text_field("time"),
        int8_field("duration_minutes"),
        int8_field("total_price_cents"),
        text_field("status"),
    ]
}

/// Result schema for a SELECT, keyed on the table name in the statement.
fn select_schema(sql: &str) -> Option<Vec<FieldInfo>> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return None;
    }
    if upper.contains("AVAILABILITY") {
        Some(availability_schema())
    } else if upper.contains("BUSINESSES") {
        Some(businesses_schema())
    } else if upper.contains("SERVICES") {
        Some(services_schema())
    } else if upper.contains("BOOKINGS") {
        Some(bookings_schema())
    } else {
        None
    }
}

#[async_trait]
impl SimpleQueryHandler for CreneauHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.execute_command(&engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CreneauQueryParser;

#[async_trait]
impl QueryParser for CreneauQueryParser {
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

#[async_trait]
impl ExtendedQueryHandler for CreneauHandler {
    type Statement = String;
    type QueryParser = CreneauQueryParser;

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
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, cmd).await?;
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

// ── Factory ──────────────────────────────────────────────────────

pub struct CreneauFactory {
    handler: Arc<CreneauHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CreneauAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CreneauFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = CreneauAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CreneauHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CreneauFactory {
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

/// Serve one TCP connection through the pgwire machinery.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(CreneauFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

/// Engine failures map to distinct SQLSTATEs so clients can tell "pick
/// another slot" (23P01) from "retry" (58030) from "fix your input" (23514).
fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::Overlap(_) => "23P01",
        EngineError::Validation(_) | EngineError::InvalidTransition { .. } => "23514",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Wal(_) => "58030",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match &e {
        SqlError::BadValue(_) => "22023",
        _ => "42601",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}
