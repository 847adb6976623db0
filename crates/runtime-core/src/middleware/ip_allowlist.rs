//! IP allow-list middleware (spec §4.2 "IP allow-list"). CIDRs are parsed
//! once at construction; invalid entries are logged and skipped. Supports
//! IPv4 and IPv6; a missing port on the remote address is tolerated.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::Error as ActixError;

#[derive(Debug, Clone, Copy)]
pub struct Cidr {
    network: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    pub fn parse(spec: &str) -> Option<Self> {
        let (addr_part, prefix_part) = spec.split_once('/')?;
        let network: IpAddr = addr_part.trim().parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len: u8 = prefix_part.trim().parse().ok()?;
        if prefix_len > max_prefix {
            return None;
        }
        Some(Self { network, prefix_len })
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_for(self.prefix_len, 32);
                u32::from(net) & mask == u32::from(*ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_for_128(self.prefix_len);
                u128::from(net) & mask == u128::from(*ip) & mask
            }
            _ => false,
        }
    }
}

fn mask_for(prefix_len: u8, bits: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else if prefix_len >= bits {
        u32::MAX
    } else {
        u32::MAX << (bits - prefix_len)
    }
}

fn mask_for_128(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else if prefix_len >= 128 {
        u128::MAX
    } else {
        u128::MAX << (128 - prefix_len)
    }
}

/// Parses `specs`, logging and skipping any entry that fails to parse.
pub fn parse_cidrs(specs: &[String]) -> Vec<Cidr> {
    specs
        .iter()
        .filter_map(|spec| match Cidr::parse(spec) {
            Some(cidr) => Some(cidr),
            None => {
                tracing::warn!(cidr = %spec, "skipping invalid CIDR in allow-list");
                None
            }
        })
        .collect()
}

fn extract_ip(peer_addr: &str) -> Option<IpAddr> {
    if let Ok(ip) = peer_addr.parse::<IpAddr>() {
        return Some(ip);
    }
    // host:port form; IPv6 with brackets is handled by rsplit_once on ']'.
    if let Some(stripped) = peer_addr.strip_prefix('[') {
        if let Some((host, _)) = stripped.split_once(']') {
            return host.parse().ok();
        }
    }
    peer_addr.rsplit_once(':').and_then(|(host, _)| host.parse().ok())
}

pub struct IpAllowList {
    cidrs: Vec<Cidr>,
}

impl IpAllowList {
    pub fn new(cidrs: Vec<Cidr>) -> Self {
        Self { cidrs }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IpAllowList
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = ActixError;
    type Transform = IpAllowListMiddleware<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(IpAllowListMiddleware {
            service,
            cidrs: self.cidrs.clone(),
        }))
    }
}

pub struct IpAllowListMiddleware<S> {
    service: S,
    cidrs: Vec<Cidr>,
}

impl<S, B> Service<ServiceRequest> for IpAllowListMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = ActixError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let peer = req.connection_info().peer_addr().map(|s| s.to_string());
        let allowed = peer
            .as_deref()
            .and_then(extract_ip)
            .map(|ip| self.cidrs.iter().any(|c| c.contains(&ip)))
            .unwrap_or(false);

        if !allowed {
            let response = actix_web::HttpResponse::Forbidden().json(serde_json::json!({
                "error": {"code": "FORBIDDEN", "message": "access denied"}
            }));
            let (http_req, _payload) = req.into_parts();
            return Box::pin(async move {
                Ok(ServiceResponse::new(http_req, response).map_into_right_body())
            });
        }

        let fut = self.service.call(req);
        Box::pin(async move { Ok(fut.await?.map_into_left_body()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_cidr() {
        let cidr = Cidr::parse("10.0.0.0/8").unwrap();
        assert!(cidr.contains(&"10.1.2.3".parse().unwrap()));
        assert!(!cidr.contains(&"11.0.0.1".parse().unwrap()));
    }

    #[test]
    fn parses_ipv6_cidr() {
        let cidr = Cidr::parse("::1/128").unwrap();
        assert!(cidr.contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn invalid_cidrs_are_skipped_not_fatal() {
        let cidrs = parse_cidrs(&["not-a-cidr".to_string(), "10.0.0.0/8".to_string()]);
        assert_eq!(cidrs.len(), 1);
    }

    #[test]
    fn tolerates_missing_port_on_remote_addr() {
        assert_eq!(extract_ip("10.0.0.5"), Some("10.0.0.5".parse().unwrap()));
        assert_eq!(extract_ip("10.0.0.5:8080"), Some("10.0.0.5".parse().unwrap()));
    }
}
