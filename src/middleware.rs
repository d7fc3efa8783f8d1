pub mod rate_limit;

use crate::models::session::DeviceInfo;
use crate::service::device::device_info;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{Header, HeaderMap, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::{Data, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use std::net::IpAddr;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEVICE_ID_HEADER: &str = "X-Device-ID";

/// Per-request correlation id, echoed back as `X-Request-Id`.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        RequestId(Uuid::new_v4().to_string())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestId {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        if let Some(request_id) = request.local_cache(|| None::<RequestId>).as_ref() {
            return Outcome::Success(request_id.clone());
        }

        // Fairing not attached
        Outcome::Success(RequestId::new())
    }
}

/// Tags every request with an id, logs failures and sets the security headers.
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        let request_id = RequestId::new();
        request.local_cache(|| Some(request_id.clone()));

        info!(
            request_id = %request_id.0,
            method = %request.method(),
            uri = %request.uri(),
            "incoming request"
        );
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let request_id = request
            .local_cache(|| None::<RequestId>)
            .as_ref()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let status = response.status();

        response.set_header(Header::new("X-Request-Id", request_id.clone()));
        response.set_header(Header::new("X-Content-Type-Options", "nosniff"));
        response.set_header(Header::new("X-Frame-Options", "DENY"));
        response.set_header(Header::new("Cache-Control", "no-store"));

        if status.class().is_server_error() || status.class().is_client_error() {
            warn!(
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
                status = %status.code,
                "request completed with error"
            );
        } else {
            info!(
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
                status = %status.code,
                "request completed"
            );
        }
    }
}

/// Raw `User-Agent` header, if the client sent one.
pub struct UserAgent(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserAgent {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, ()> {
        let ua = req.headers().get_one("User-Agent").map(|s| s.to_string());
        Outcome::Success(UserAgent(ua))
    }
}

impl<'a> OpenApiFromRequest<'a> for UserAgent {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}

/// Client address as seen through the proxy chain: first hop of
/// `X-Forwarded-For`, then `X-Real-IP`, then `CF-Connecting-IP`, then the socket.
pub fn resolve_client_ip(headers: &HeaderMap<'_>, socket_ip: Option<IpAddr>) -> Option<String> {
    let forwarded = headers
        .get_one("X-Forwarded-For")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    forwarded
        .or_else(|| headers.get_one("X-Real-IP").map(str::trim).filter(|ip| !ip.is_empty()))
        .or_else(|| headers.get_one("CF-Connecting-IP").map(str::trim).filter(|ip| !ip.is_empty()))
        .map(str::to_string)
        .or_else(|| socket_ip.map(|ip| ip.to_string()))
}

/// Guard wrapper around [`resolve_client_ip`].
pub struct ClientIp(pub Option<String>);

impl ClientIp {
    pub fn or_unknown(&self) -> &str {
        self.0.as_deref().unwrap_or("unknown")
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, ()> {
        let ip = resolve_client_ip(req.headers(), req.remote().map(|addr| addr.ip()));
        Outcome::Success(ClientIp(ip))
    }
}

impl<'a> OpenApiFromRequest<'a> for ClientIp {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}

/// Device the request comes from, ready to bind a session to.
pub struct RequestDevice(pub DeviceInfo);

impl RequestDevice {
    pub fn into_inner(self) -> DeviceInfo {
        self.0
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestDevice {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, ()> {
        let (Outcome::Success(ip), Outcome::Success(UserAgent(user_agent))) = (req.guard::<ClientIp>().await, req.guard::<UserAgent>().await) else {
            return Outcome::Error((Status::BadRequest, ()));
        };

        let device = device_info(req.headers().get_one(DEVICE_ID_HEADER), user_agent.as_deref(), ip.or_unknown());
        Outcome::Success(RequestDevice(device))
    }
}

impl<'a> OpenApiFromRequest<'a> for RequestDevice {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap<'static> {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.add(Header::new(*name, *value));
        }
        map
    }

    const SOCKET: Option<IpAddr> = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));

    #[test]
    fn test_request_ids_are_unique() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert!(Uuid::parse_str(&id1.0).is_ok());
        assert_ne!(id1.0, id2.0);
    }

    #[test]
    fn forwarded_for_first_hop_wins() {
        let map = headers(&[("X-Forwarded-For", "203.0.113.5, 10.0.0.2"), ("X-Real-IP", "198.51.100.7")]);
        assert_eq!(resolve_client_ip(&map, SOCKET).as_deref(), Some("203.0.113.5"));
    }

    #[test]
    fn falls_back_through_proxy_headers() {
        let real_ip = headers(&[("X-Real-IP", "198.51.100.7"), ("CF-Connecting-IP", "192.0.2.1")]);
        assert_eq!(resolve_client_ip(&real_ip, SOCKET).as_deref(), Some("198.51.100.7"));

        let cloudflare = headers(&[("CF-Connecting-IP", "192.0.2.1")]);
        assert_eq!(resolve_client_ip(&cloudflare, SOCKET).as_deref(), Some("192.0.2.1"));
    }

    #[test]
    fn socket_address_is_last_resort() {
        let empty_forward = headers(&[("X-Forwarded-For", " ")]);
        assert_eq!(resolve_client_ip(&empty_forward, SOCKET).as_deref(), Some("10.0.0.1"));
        assert_eq!(resolve_client_ip(&HeaderMap::new(), None), None);
    }
}
