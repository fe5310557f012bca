//! Messages and method descriptors for the demo backend.
//!
//! Declared by hand with prost derives; only the fields the demo reads are
//! present. Unknown fields on the wire are skipped by prost.

use horizon_bridge::grpc::{MethodDescriptor, StreamingMethod, UnaryMethod};

/// `web.User`
#[derive(Clone, PartialEq, prost::Message)]
pub struct User {
    #[prost(string, tag = "1")]
    pub id: String,
}

/// `web.GetUserRequest`
#[derive(Clone, PartialEq, prost::Message)]
pub struct GetUserRequest {
    #[prost(string, tag = "1")]
    pub user_id: String,
}

/// `web.GetUsersRequest`
#[derive(Clone, PartialEq, prost::Message)]
pub struct GetUsersRequest {
    #[prost(int64, tag = "1")]
    pub num_users: i64,
}

/// `grpc.channelz.v1.GetServersRequest`
#[derive(Clone, PartialEq, prost::Message)]
pub struct GetServersRequest {
    #[prost(int64, tag = "1")]
    pub start_server_id: i64,
    #[prost(int64, tag = "2")]
    pub max_results: i64,
}

/// `grpc.channelz.v1.GetServersResponse`
#[derive(Clone, PartialEq, prost::Message)]
pub struct GetServersResponse {
    #[prost(message, repeated, tag = "1")]
    pub server: Vec<Server>,
    #[prost(bool, tag = "2")]
    pub end: bool,
}

/// `grpc.channelz.v1.Server`
#[derive(Clone, PartialEq, prost::Message)]
pub struct Server {
    #[prost(message, optional, tag = "1")]
    pub r#ref: Option<ServerRef>,
    #[prost(message, optional, tag = "2")]
    pub data: Option<ServerData>,
}

/// `grpc.channelz.v1.ServerRef`
#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerRef {
    #[prost(int64, tag = "5")]
    pub server_id: i64,
    #[prost(string, tag = "6")]
    pub name: String,
}

/// `grpc.channelz.v1.ServerData`
#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerData {
    #[prost(int64, tag = "2")]
    pub calls_started: i64,
    #[prost(int64, tag = "3")]
    pub calls_succeeded: i64,
    #[prost(int64, tag = "4")]
    pub calls_failed: i64,
    #[prost(message, optional, tag = "5")]
    pub last_call_started_timestamp: Option<prost_types::Timestamp>,
}

pub const GET_USER: &str = "/web.Backend/GetUser";
pub const GET_USERS: &str = "/web.Backend/GetUsers";
pub const GET_SERVERS: &str = "/grpc.channelz.v1.Channelz/GetServers";

/// `web.Backend/GetUser`
pub fn get_user() -> UnaryMethod<GetUserRequest, User> {
    MethodDescriptor::prost_unary(GET_USER)
}

/// `web.Backend/GetUsers`
pub fn get_users() -> StreamingMethod<GetUsersRequest, User> {
    MethodDescriptor::prost_server_streaming(GET_USERS)
}

/// `grpc.channelz.v1.Channelz/GetServers`
pub fn get_servers() -> UnaryMethod<GetServersRequest, GetServersResponse> {
    MethodDescriptor::prost_unary(GET_SERVERS)
}
