//! Hand-written request types for a login service and a calculator, shaped
//! the way generated stubs are.

#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bindrpc_core::{
    ErrorCode, ExceptionDescriptor, InterfaceId, TypeId,
    protocol::{TYPEID_BYTES, TYPEID_DOUBLE, TYPEID_INT32, TYPEID_INT64, TYPEID_STRING, TYPEID_VOID},
};
use bindrpc_dispatch::{
    Completion, MethodRequest, Protocol, Remote, RemoteDirectory, RemoteInterface, Session,
    SessionField, SessionStore, Value,
};
use bindrpc_wire::{CodecError, Input, Output, Registered, Serializable};
use tokio::sync::Notify;

pub const LOGIN_INTERFACE: InterfaceId = InterfaceId(1983670399);
pub const CALC_INTERFACE: InterfaceId = InterfaceId(42);

#[async_trait]
pub trait LoginService: Send + Sync {
    async fn login(&self, user_name: String, user_pwd: String) -> Result<Vec<u8>, ExceptionDescriptor>;
    async fn whoami(&self, session: &Session) -> Result<String, ExceptionDescriptor>;
}

impl RemoteInterface for dyn LoginService {
    const INTERFACE_ID: InterfaceId = LOGIN_INTERFACE;
    const NAME: &'static str = "LoginService";
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserSession {
    pub user: String,
}

/// Accepts `alice`/`secret` and stores a session under the issued token.
#[derive(Default)]
pub struct TestLogin {
    pub sessions: Arc<SessionStore>,
    pub logins: AtomicUsize,
    pub whoami_calls: AtomicUsize,
}

#[async_trait]
impl LoginService for TestLogin {
    async fn login(&self, user_name: String, user_pwd: String) -> Result<Vec<u8>, ExceptionDescriptor> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if user_name != "alice" || user_pwd != "secret" {
            return Err(ExceptionDescriptor::new(ErrorCode::Forbidden, "bad credentials"));
        }
        let token = format!("token-{user_name}");
        self.sessions
            .insert(token.clone(), Session::new(UserSession { user: user_name }));
        Ok(token.into_bytes())
    }

    async fn whoami(&self, session: &Session) -> Result<String, ExceptionDescriptor> {
        self.whoami_calls.fetch_add(1, Ordering::SeqCst);
        session
            .downcast_ref::<UserSession>()
            .map(|session| session.user.clone())
            .ok_or_else(|| ExceptionDescriptor::internal("foreign session type"))
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoginRequest {
    pub user_name: String,
    pub user_pwd: String,
}

impl Serializable for LoginRequest {
    fn wire_type_id(&self) -> TypeId {
        Self::TYPE_ID
    }

    fn write(&self, out: &mut Output) -> Result<(), CodecError> {
        out.put_str(&self.user_name)?;
        out.put_str(&self.user_pwd)
    }

    fn read(&mut self, input: &mut Input<'_>) -> Result<(), CodecError> {
        self.user_name = input.get_str()?;
        self.user_pwd = input.get_str()?;
        Ok(())
    }
}

impl Registered for LoginRequest {
    const TYPE_ID: TypeId = TypeId(70001);
}

#[async_trait]
impl MethodRequest for LoginRequest {
    fn interface_id(&self) -> InterfaceId {
        LOGIN_INTERFACE
    }

    fn result_type_id(&self) -> TypeId {
        TYPEID_BYTES
    }

    async fn execute(self: Box<Self>, remote: Remote, completion: Completion<Value>) {
        let outcome = match remote.interface::<dyn LoginService>() {
            Ok(service) => service
                .login(self.user_name, self.user_pwd)
                .await
                .map(Value::Bytes),
            Err(exception) => Err(exception),
        };
        completion.complete(outcome);
    }
}

/// Session reference a caller sends in a session field.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SessionRef {
    pub token: String,
}

impl Serializable for SessionRef {
    fn wire_type_id(&self) -> TypeId {
        Self::TYPE_ID
    }

    fn write(&self, out: &mut Output) -> Result<(), CodecError> {
        out.put_str(&self.token)
    }

    fn read(&mut self, input: &mut Input<'_>) -> Result<(), CodecError> {
        self.token = input.get_str()?;
        Ok(())
    }
}

impl Registered for SessionRef {
    const TYPE_ID: TypeId = TypeId(70003);
}

#[derive(Debug, Default)]
pub struct WhoAmIRequest {
    pub session: SessionField,
}

impl Serializable for WhoAmIRequest {
    fn wire_type_id(&self) -> TypeId {
        Self::TYPE_ID
    }

    fn write(&self, out: &mut Output) -> Result<(), CodecError> {
        out.write(&self.session)
    }

    fn read(&mut self, input: &mut Input<'_>) -> Result<(), CodecError> {
        self.session = input.read()?;
        Ok(())
    }
}

impl Registered for WhoAmIRequest {
    const TYPE_ID: TypeId = TypeId(70002);
}

#[async_trait]
impl MethodRequest for WhoAmIRequest {
    fn interface_id(&self) -> InterfaceId {
        LOGIN_INTERFACE
    }

    fn result_type_id(&self) -> TypeId {
        TYPEID_STRING
    }

    fn session_slot(&mut self) -> Option<&mut SessionField> {
        Some(&mut self.session)
    }

    fn session_required(&self) -> bool {
        true
    }

    async fn execute(self: Box<Self>, remote: Remote, completion: Completion<Value>) {
        let Some(session) = self.session.session().cloned() else {
            completion.fail(ExceptionDescriptor::session_required(LOGIN_INTERFACE));
            return;
        };
        let outcome = match remote.interface::<dyn LoginService>() {
            Ok(service) => service.whoami(&session).await.map(Value::String),
            Err(exception) => Err(exception),
        };
        completion.complete(outcome);
    }
}

pub trait Calculator: Send + Sync {
    fn add(&self, a: i32, b: i32) -> i32;
    fn divide(&self, a: f64, b: f64) -> Result<f64, ExceptionDescriptor>;
    /// Keeps the completion for the test to fire later.
    fn park(&self, completion: Completion<Value>);
    fn stats(&self) -> Option<Stats>;
    fn gates(&self) -> Gates;
}

/// Lets a test hold a method before it completes and observe when it
/// resumes.
#[derive(Clone, Default)]
pub struct Gates {
    pub open: Arc<Notify>,
    pub passed: Arc<Notify>,
}

impl RemoteInterface for dyn Calculator {
    const INTERFACE_ID: InterfaceId = CALC_INTERFACE;
    const NAME: &'static str = "Calculator";
}

#[derive(Default)]
pub struct TestCalculator {
    pub parked: Mutex<Vec<Completion<Value>>>,
    pub stats: Mutex<Option<Stats>>,
    pub gates: Gates,
}

impl TestCalculator {
    pub fn take_parked(&self) -> Vec<Completion<Value>> {
        std::mem::take(&mut *self.parked.lock().expect("parked lock should not be poisoned"))
    }
}

impl Calculator for TestCalculator {
    fn add(&self, a: i32, b: i32) -> i32 {
        a.wrapping_add(b)
    }

    fn divide(&self, a: f64, b: f64) -> Result<f64, ExceptionDescriptor> {
        if b == 0.0 {
            return Err(ExceptionDescriptor::new(ErrorCode::Other(1001), "division by zero"));
        }
        Ok(a / b)
    }

    fn park(&self, completion: Completion<Value>) {
        self.parked
            .lock()
            .expect("parked lock should not be poisoned")
            .push(completion);
    }

    fn stats(&self) -> Option<Stats> {
        self.stats
            .lock()
            .expect("stats lock should not be poisoned")
            .clone()
    }

    fn gates(&self) -> Gates {
        self.gates.clone()
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Stats {
    pub calls: u64,
    pub last_op: String,
}

impl Serializable for Stats {
    fn wire_type_id(&self) -> TypeId {
        Self::TYPE_ID
    }

    fn write(&self, out: &mut Output) -> Result<(), CodecError> {
        out.put_u64(self.calls);
        out.put_str(&self.last_op)
    }

    fn read(&mut self, input: &mut Input<'_>) -> Result<(), CodecError> {
        self.calls = input.get_u64()?;
        self.last_op = input.get_str()?;
        Ok(())
    }
}

impl Registered for Stats {
    const TYPE_ID: TypeId = TypeId(70100);
}

macro_rules! calc_request {
    ($name:ident, $id:expr, $result:expr, { $($field:ident: $ty:ty => $put:ident / $get:ident),* }, |$this:ident, $calc:ident, $completion:ident| $body:block) => {
        #[derive(Debug, Default, Clone, PartialEq)]
        pub struct $name {
            $(pub $field: $ty,)*
        }

        impl Serializable for $name {
            fn wire_type_id(&self) -> TypeId {
                Self::TYPE_ID
            }

            #[allow(unused_variables)]
            fn write(&self, out: &mut Output) -> Result<(), CodecError> {
                $(out.$put(self.$field);)*
                Ok(())
            }

            #[allow(unused_variables)]
            fn read(&mut self, input: &mut Input<'_>) -> Result<(), CodecError> {
                $(self.$field = input.$get()?;)*
                Ok(())
            }
        }

        impl Registered for $name {
            const TYPE_ID: TypeId = TypeId($id);
        }

        #[async_trait]
        impl MethodRequest for $name {
            fn interface_id(&self) -> InterfaceId {
                CALC_INTERFACE
            }

            fn result_type_id(&self) -> TypeId {
                $result
            }

            #[allow(unused_variables)]
            async fn execute(self: Box<Self>, remote: Remote, completion: Completion<Value>) {
                let $calc = match remote.interface::<dyn Calculator>() {
                    Ok(calc) => calc,
                    Err(exception) => {
                        completion.fail(exception);
                        return;
                    }
                };
                let $this = *self;
                let $completion = completion;
                $body
            }
        }
    };
}

calc_request!(AddRequest, 70010, TYPEID_INT32, { a: i32 => put_i32 / get_i32, b: i32 => put_i32 / get_i32 },
    |req, calc, completion| {
        completion.succeed(Value::Int32(calc.add(req.a, req.b)));
    });

calc_request!(DivideRequest, 70011, TYPEID_DOUBLE, { a: f64 => put_f64 / get_f64, b: f64 => put_f64 / get_f64 },
    |req, calc, completion| {
        completion.complete(calc.divide(req.a, req.b).map(Value::Double));
    });

calc_request!(SlowEchoRequest, 70012, TYPEID_INT64, { delay_ms: u64 => put_u64 / get_u64, tag: i64 => put_i64 / get_i64 },
    |req, calc, completion| {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(req.delay_ms)).await;
            completion.succeed(Value::Int64(req.tag));
        });
    });

calc_request!(ParkRequest, 70013, TYPEID_INT32, {},
    |req, calc, completion| {
        calc.park(completion);
    });

calc_request!(DropRequest, 70014, TYPEID_VOID, {},
    |req, calc, completion| {
        drop(completion);
    });

calc_request!(StatsRequest, 70015, Stats::TYPE_ID, {},
    |req, calc, completion| {
        completion.succeed(Value::Object(calc.stats().map(|stats| Box::new(stats) as Box<dyn Serializable>)));
    });

calc_request!(ResetRequest, 70016, TYPEID_VOID, {},
    |req, calc, completion| {
        completion.succeed(Value::Void);
    });

calc_request!(WrongShapeRequest, 70017, TYPEID_INT32, {},
    |req, calc, completion| {
        completion.succeed(Value::from("not an int"));
    });

calc_request!(PanicRequest, 70018, TYPEID_VOID, {},
    |req, calc, completion| {
        panic!("calculator exploded");
    });

calc_request!(GatedRequest, 70019, TYPEID_INT32, {},
    |req, calc, completion| {
        let gates = calc.gates();
        gates.open.notified().await;
        gates.passed.notify_one();
        completion.succeed(Value::Int32(7));
    });

pub fn protocol() -> Protocol {
    let mut builder = Protocol::builder();
    builder
        .register_request::<LoginRequest>()
        .and_then(|b| b.register_request::<WhoAmIRequest>())
        .and_then(|b| b.register_request::<AddRequest>())
        .and_then(|b| b.register_request::<DivideRequest>())
        .and_then(|b| b.register_request::<SlowEchoRequest>())
        .and_then(|b| b.register_request::<ParkRequest>())
        .and_then(|b| b.register_request::<DropRequest>())
        .and_then(|b| b.register_request::<StatsRequest>())
        .and_then(|b| b.register_request::<ResetRequest>())
        .and_then(|b| b.register_request::<WrongShapeRequest>())
        .and_then(|b| b.register_request::<PanicRequest>())
        .and_then(|b| b.register_request::<GatedRequest>())
        .and_then(|b| b.register_type::<Stats>())
        .and_then(|b| b.register_type::<SessionRef>())
        .expect("fixture types should register");
    builder.build()
}

pub struct Services {
    pub directory: Arc<RemoteDirectory>,
    pub login: Arc<TestLogin>,
    pub calculator: Arc<TestCalculator>,
}

pub fn services() -> Services {
    let directory = Arc::new(RemoteDirectory::new());
    let login = Arc::new(TestLogin::default());
    let calculator = Arc::new(TestCalculator::default());
    directory.bind::<dyn LoginService>(login.clone());
    directory.bind::<dyn Calculator>(calculator.clone());
    Services {
        directory,
        login,
        calculator,
    }
}

pub fn encode_request(protocol: &Protocol, request: &dyn MethodRequest) -> Vec<u8> {
    protocol
        .encode_request(request)
        .expect("request should encode")
        .bytes
}
