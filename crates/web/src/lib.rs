mod app;
mod body;
mod compile;
mod context;
mod dispatch;
mod facet;
mod module;
mod pattern;
mod payload;
mod response;
mod server;

pub mod sse;
pub mod validator;
pub mod ws;

pub use app::app;
pub use app::AfterPlugin;
pub use app::App;
pub use app::AppBuilder;
pub use app::BeforePlugin;
pub use body::BoxError;
pub use body::OptionReqBody;
pub use body::ReqBody;
pub use body::RequestError;
pub use body::ResponseBody;
pub use compile::compile;
pub use compile::CompileError;
pub use compile::Endpoint;
pub use compile::LinkInfo;
pub use compile::MethodTable;
pub use context::Context;
pub use context::ContextRequest;
pub use context::ContextResponse;
pub use context::Memory;
pub use context::ResponseContent;
pub use dispatch::Next;
pub use facet::Facet;
pub use facet::FacetSet;
pub use module::module;
pub use module::BoxFuture;
pub use module::Module;
pub use module::Route;
pub use module::RouteMethod;
pub use module::RouteOptions;
pub use module::ValidatorRequest;
pub use pattern::MethodMatcher;
pub use pattern::PathPattern;
pub use payload::error;
pub use payload::success;
pub use payload::Payload;
pub use payload::PayloadBody;
pub use payload::Reply;
pub use server::Server;
pub use server::ServerBuildError;
pub use server::ServerBuilder;
