//! Remote procedure calls on shared objects.
//!
//! Each shared object type declares its callable methods once, in an
//! [`RpcTable`], when it's registered. A call names the target object, the
//! method, and carries its arguments as [`Value`]s; the receiver picks the
//! first method whose name and parameter kinds match, checks the method's
//! [`Direction`], and invokes it.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tether_protocol::{
    Direction, ObjectId, PeerId, ProtocolError, RequestId, RpcArg, RpcReturn, Value, ValueKind,
};

use crate::object::{ObjectTable, SharedObject};
use crate::replication::relay;
use crate::{ClientContext, Packet, Registry, ServerContext, Target};

type Handler<T> =
    Box<dyn Fn(&mut T, Vec<Value>) -> Result<Option<Value>, ProtocolError> + Send + Sync>;

struct Method<T> {
    name: &'static str,
    direction: Direction,
    params: Vec<ValueKind>,
    handler: Handler<T>,
}

impl<T> Method<T> {
    fn matches(&self, name: &str, args: &[Value]) -> bool {
        self.name == name
            && self.params.len() == args.len()
            && self.params.iter().zip(args).all(|(kind, arg)| kind.accepts(arg))
    }
}

// ---------------------------------------------------------------------------
// RpcTable
// ---------------------------------------------------------------------------

/// The callable methods of one shared object type.
///
/// Several methods may share a name as long as their parameter kinds
/// differ; resolution takes the first one registered that matches.
///
/// ```rust
/// use tether::prelude::*;
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Serialize, Deserialize)]
/// # struct Note { core: SharedCore, content: String }
///
/// impl SharedObject for Note {
///     const TYPE_NAME: &'static str = "note";
///     # fn core(&self) -> &SharedCore { &self.core }
///     # fn core_mut(&mut self) -> &mut SharedCore { &mut self.core }
///
///     fn register_rpcs(table: &mut RpcTable<Self>) {
///         table
///             .method0("content", Direction::CLIENT_TO_SERVER, |note: &mut Note| {
///                 note.content.clone()
///             })
///             .method1("append", Direction::all(), |note: &mut Note, text: String| {
///                 note.content.push_str(&text);
///             });
///     }
/// }
/// ```
pub struct RpcTable<T> {
    methods: Vec<Method<T>>,
    _object: PhantomData<fn(&mut T)>,
}

impl<T> Default for RpcTable<T> {
    fn default() -> Self {
        Self {
            methods: Vec::new(),
            _object: PhantomData,
        }
    }
}

impl<T: SharedObject> RpcTable<T> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method with explicit parameter kinds and a handler
    /// working on raw values.
    pub fn method<F>(
        &mut self,
        name: &'static str,
        direction: Direction,
        params: Vec<ValueKind>,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(&mut T, Vec<Value>) -> Result<Option<Value>, ProtocolError> + Send + Sync + 'static,
    {
        self.methods.push(Method {
            name,
            direction,
            params,
            handler: Box::new(handler),
        });
        self
    }

    /// Registers a method without parameters.
    pub fn method0<R, F>(&mut self, name: &'static str, direction: Direction, f: F) -> &mut Self
    where
        R: RpcReturn,
        F: Fn(&mut T) -> R + Send + Sync + 'static,
    {
        self.method(name, direction, Vec::new(), move |object, _| {
            f(object).into_response()
        })
    }

    /// Registers a method with one parameter.
    pub fn method1<A, R, F>(&mut self, name: &'static str, direction: Direction, f: F) -> &mut Self
    where
        A: RpcArg,
        R: RpcReturn,
        F: Fn(&mut T, A) -> R + Send + Sync + 'static,
    {
        self.method(name, direction, vec![A::kind()], move |object, args| {
            let mut args = args.into_iter();
            let a = A::from_value(next_arg(&mut args)?)?;
            f(object, a).into_response()
        })
    }

    /// Registers a method with two parameters.
    pub fn method2<A, B, R, F>(
        &mut self,
        name: &'static str,
        direction: Direction,
        f: F,
    ) -> &mut Self
    where
        A: RpcArg,
        B: RpcArg,
        R: RpcReturn,
        F: Fn(&mut T, A, B) -> R + Send + Sync + 'static,
    {
        self.method(
            name,
            direction,
            vec![A::kind(), B::kind()],
            move |object, args| {
                let mut args = args.into_iter();
                let a = A::from_value(next_arg(&mut args)?)?;
                let b = B::from_value(next_arg(&mut args)?)?;
                f(object, a, b).into_response()
            },
        )
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// `true` if no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

fn next_arg(args: &mut impl Iterator<Item = Value>) -> Result<Value, ProtocolError> {
    args.next()
        .ok_or_else(|| ProtocolError::ArgumentMismatch("missing argument".into()))
}

/// Type-erased method lookup, stored per object type in the registry.
pub(crate) trait MethodTable: Send + Sync {
    fn resolve(&self, name: &str, args: &[Value]) -> Option<usize>;
    fn direction(&self, index: usize) -> Direction;
    fn invoke(
        &self,
        index: usize,
        target: &mut dyn Any,
        args: Vec<Value>,
    ) -> Result<Option<Value>, ProtocolError>;
}

impl<T: SharedObject> MethodTable for RpcTable<T> {
    fn resolve(&self, name: &str, args: &[Value]) -> Option<usize> {
        self.methods.iter().position(|m| m.matches(name, args))
    }

    fn direction(&self, index: usize) -> Direction {
        self.methods
            .get(index)
            .map_or(Direction::empty(), |m| m.direction)
    }

    fn invoke(
        &self,
        index: usize,
        target: &mut dyn Any,
        args: Vec<Value>,
    ) -> Result<Option<Value>, ProtocolError> {
        let method = self
            .methods
            .get(index)
            .ok_or_else(|| ProtocolError::InvalidMessage(format!("no method at index {index}")))?;
        let target = target.downcast_mut::<T>().ok_or_else(|| {
            ProtocolError::InvalidMessage(format!("target is not a {}", T::TYPE_NAME))
        })?;
        (method.handler)(target, args)
    }
}

// ---------------------------------------------------------------------------
// Packets
// ---------------------------------------------------------------------------

/// Invokes a method on a shared object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCall {
    /// Set by the server when relaying a client's call.
    pub forwarded: bool,
    /// The target object.
    pub object: ObjectId,
    /// Correlates the eventual response with the caller's callback.
    pub request: RequestId,
    /// Method name.
    pub method: String,
    /// Arguments, in parameter order.
    pub args: Vec<Value>,
}

impl RpcCall {
    /// A call with a fresh correlation id.
    pub fn new(object: ObjectId, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            forwarded: false,
            object,
            request: RequestId::random(),
            method: method.into(),
            args,
        }
    }
}

/// Carries a method's result back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// The call's correlation id.
    pub request: RequestId,
    /// The object the call targeted.
    pub object: ObjectId,
    /// The method's result.
    pub result: Value,
}

/// Finds the method a call names on a locally held object.
fn lookup(
    registry: &Registry,
    objects: &ObjectTable,
    call: &RpcCall,
) -> Option<(Arc<dyn MethodTable>, usize)> {
    let Some(object) = objects.get_dyn(call.object) else {
        tracing::debug!(object = %call.object, method = %call.method, "rpc for unknown object dropped");
        return None;
    };
    let methods = Arc::clone(&registry.object_type(object.type_name()).ok()?.methods);
    let Some(index) = methods.resolve(&call.method, &call.args) else {
        tracing::debug!(
            object = %call.object,
            method = %call.method,
            args = call.args.len(),
            "no matching rpc method"
        );
        return None;
    };
    Some((methods, index))
}

fn invoke(
    methods: &dyn MethodTable,
    index: usize,
    objects: &mut ObjectTable,
    call: RpcCall,
) -> Option<RpcResponse> {
    let object = objects.get_dyn_mut(call.object)?;
    match methods.invoke(index, object.as_any_mut(), call.args) {
        Ok(result) => result.map(|result| RpcResponse {
            request: call.request,
            object: call.object,
            result,
        }),
        Err(e) => {
            tracing::warn!(object = %call.object, method = %call.method, error = %e, "rpc invocation failed");
            None
        }
    }
}

impl Packet for RpcCall {
    fn process_client(self, ctx: &mut ClientContext<'_>) {
        let Some((methods, index)) = lookup(ctx.transmitter.registry(), ctx.objects, &self) else {
            return;
        };
        if !methods.direction(index).accepted_by_client(self.forwarded) {
            tracing::debug!(method = %self.method, forwarded = self.forwarded, "rpc rejected by direction");
            return;
        }
        tracing::trace!(object = %self.object, method = %self.method, "invoking rpc");
        if let Some(response) = invoke(methods.as_ref(), index, ctx.objects, self) {
            if let Err(e) = ctx.transmitter.send(&response) {
                tracing::debug!(error = %e, "rpc response not sent");
            }
        }
    }

    fn process_server(self, ctx: &mut ServerContext<'_>, source: PeerId) {
        let Some((methods, index)) = lookup(ctx.registry, ctx.objects, &self) else {
            return;
        };
        let direction = methods.direction(index);

        if direction.relayed() {
            let forwarded = RpcCall {
                forwarded: true,
                ..self.clone()
            };
            relay(ctx, &forwarded, source, direction);
        }

        if direction.accepted_by_server() {
            tracing::trace!(object = %self.object, method = %self.method, %source, "invoking rpc");
            if let Some(response) = invoke(methods.as_ref(), index, ctx.objects, self) {
                if let Err(e) = ctx.send(Target::Peer(source), &response) {
                    tracing::debug!(%source, error = %e, "rpc response not sent");
                }
            }
        }
    }
}

fn complete(objects: &mut ObjectTable, response: RpcResponse) {
    let Some(object) = objects.get_dyn_mut(response.object) else {
        tracing::debug!(object = %response.object, "rpc response for unknown object dropped");
        return;
    };
    match object.core_mut().take_callback(response.request) {
        Some(callback) => callback(response.result),
        None => {
            tracing::debug!(request = %response.request, "unmatched rpc response dropped");
        }
    }
}

impl Packet for RpcResponse {
    fn process_client(self, ctx: &mut ClientContext<'_>) {
        complete(ctx.objects, self);
    }

    fn process_server(self, ctx: &mut ServerContext<'_>, _source: PeerId) {
        complete(ctx.objects, self);
    }
}

/// Wraps a typed callback so it can wait in a [`SharedCore`] for a raw
/// result value.
///
/// [`SharedCore`]: crate::SharedCore
pub(crate) fn typed_callback<R, F>(callback: F) -> Box<dyn FnOnce(Value) + Send>
where
    R: RpcArg,
    F: FnOnce(R) + Send + 'static,
{
    Box::new(move |value| match R::from_value(value) {
        Ok(result) => callback(result),
        Err(e) => tracing::warn!(error = %e, "rpc result has the wrong type"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::{Typed, WireType};

    use crate::SharedCore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    impl WireType for Point {
        const TYPE_NAME: &'static str = "point";
    }

    #[derive(Serialize, Deserialize)]
    struct Board {
        core: SharedCore,
        text: String,
        last: Option<(i32, i32)>,
    }

    impl SharedObject for Board {
        const TYPE_NAME: &'static str = "board";

        fn core(&self) -> &SharedCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut SharedCore {
            &mut self.core
        }

        fn register_rpcs(table: &mut RpcTable<Self>) {
            table
                .method0("text", Direction::CLIENT_TO_SERVER, |board: &mut Board| {
                    board.text.clone()
                })
                .method1("write", Direction::all(), |board: &mut Board, text: String| {
                    board.text = text;
                })
                .method1("write", Direction::SERVER_TO_CLIENT, |board: &mut Board, n: i64| {
                    board.text = n.to_string();
                })
                .method1(
                    "mark",
                    Direction::all(),
                    |board: &mut Board, Typed(p): Typed<Point>| {
                        board.last = Some((p.x, p.y));
                    },
                )
                .method2("add", Direction::all(), |_: &mut Board, a: i32, b: i32| a + b);
        }
    }

    fn table() -> RpcTable<Board> {
        let mut table = RpcTable::new();
        Board::register_rpcs(&mut table);
        table
    }

    fn board() -> Board {
        Board {
            core: SharedCore::new(),
            text: String::new(),
            last: None,
        }
    }

    #[test]
    fn test_resolve_by_name_and_kinds() {
        let table = table();
        assert_eq!(table.len(), 5);
        assert_eq!(table.resolve("text", &[]), Some(0));
        assert_eq!(table.resolve("write", &[Value::from("hi")]), Some(1));
        assert_eq!(table.resolve("write", &[Value::Int(3)]), Some(2));
        assert_eq!(table.resolve("write", &[Value::Bool(true)]), None);
        assert_eq!(table.resolve("write", &[]), None);
        assert_eq!(table.resolve("missing", &[]), None);
    }

    #[test]
    fn test_overloads_carry_their_own_direction() {
        let table = table();
        assert_eq!(table.direction(1), Direction::all());
        assert_eq!(table.direction(2), Direction::SERVER_TO_CLIENT);
        assert_eq!(table.direction(99), Direction::empty());
    }

    #[test]
    fn test_invoke_void_method_has_no_result() {
        let table = table();
        let mut board = board();
        let result = table
            .invoke(1, &mut board, vec![Value::from("hello")])
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(board.text, "hello");
    }

    #[test]
    fn test_invoke_returns_value() {
        let table = table();
        let mut board = board();
        board.text = "content".into();
        let result = table.invoke(0, &mut board, Vec::new()).unwrap();
        assert_eq!(result, Some(Value::from("content")));

        let sum = table
            .invoke(4, &mut board, vec![Value::Int(2), Value::Int(40)])
            .unwrap();
        assert_eq!(sum, Some(Value::Int(42)));
    }

    #[test]
    fn test_invoke_typed_argument() {
        let table = table();
        let mut board = board();
        let arg = Value::typed(&Point { x: 1, y: 2 }).unwrap();
        let index = table.resolve("mark", std::slice::from_ref(&arg)).unwrap();
        table.invoke(index, &mut board, vec![arg]).unwrap();
        assert_eq!(board.last, Some((1, 2)));
    }

    #[test]
    fn test_invoke_wrong_target_fails() {
        let table = table();
        let mut not_a_board = 5u32;
        let result = table.invoke(0, &mut not_a_board, Vec::new());
        assert!(matches!(result, Err(ProtocolError::InvalidMessage(_))));
    }

    #[test]
    fn test_integer_out_of_range_fails() {
        let table = table();
        let mut board = board();
        let result = table.invoke(4, &mut board, vec![Value::Int(i64::MAX), Value::Int(1)]);
        assert!(matches!(result, Err(ProtocolError::ArgumentMismatch(_))));
    }

    #[test]
    fn test_call_has_fresh_request_id() {
        let a = RpcCall::new(ObjectId::random(), "text", Vec::new());
        let b = RpcCall::new(a.object, "text", Vec::new());
        assert!(!a.forwarded);
        assert_ne!(a.request, b.request);
    }

    #[test]
    fn test_typed_callback_converts_result() {
        let (tx, rx) = std::sync::mpsc::channel();
        let callback = typed_callback(move |text: String| {
            let _ = tx.send(text);
        });
        callback(Value::from("done"));
        assert_eq!(rx.recv().unwrap(), "done");
    }

    #[test]
    fn test_typed_callback_ignores_wrong_type() {
        let (tx, rx) = std::sync::mpsc::channel::<String>();
        let callback = typed_callback(move |text: String| {
            let _ = tx.send(text);
        });
        callback(Value::Int(1));
        assert!(rx.try_recv().is_err());
    }
}
