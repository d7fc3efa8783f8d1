use crate::models::session::DeviceInfo;
use uuid::Uuid;

pub const DEVICE_TYPE_MOBILE: &str = "mobile";
pub const DEVICE_TYPE_TABLET: &str = "tablet";
pub const DEVICE_TYPE_DESKTOP: &str = "desktop";

/// Builds the device a session gets bound to. A client that sent no device id
/// gets a fresh one and is expected to keep sending it.
pub fn device_info(device_id: Option<&str>, user_agent: Option<&str>, ip_address: &str) -> DeviceInfo {
    let user_agent = user_agent.unwrap_or_default();
    let (device_name, device_type) = parse_user_agent(user_agent);

    let device_id = match device_id.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    };

    DeviceInfo {
        device_id,
        device_name,
        device_type: device_type.to_string(),
        user_agent: user_agent.to_string(),
        ip_address: ip_address.to_string(),
    }
}

/// `("<Browser> on <OS>", device type)` from a raw `User-Agent`.
pub fn parse_user_agent(user_agent: &str) -> (String, &'static str) {
    let ua = user_agent.to_lowercase();

    let device_type = if ua.contains("ipad") || ua.contains("tablet") {
        DEVICE_TYPE_TABLET
    } else if ua.contains("mobile") || ua.contains("iphone") {
        DEVICE_TYPE_MOBILE
    } else {
        DEVICE_TYPE_DESKTOP
    };

    // Order matters: Android reports Linux, iOS reports "like Mac OS X".
    let os = if ua.contains("windows") {
        "Windows"
    } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ios") {
        "iOS"
    } else if ua.contains("mac os") {
        "macOS"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "Unknown"
    };

    // Edge and Chrome both claim Safari; Edge also claims Chrome.
    let browser = if ua.contains("edg") {
        "Edge"
    } else if ua.contains("firefox") {
        "Firefox"
    } else if ua.contains("chrome") {
        "Chrome"
    } else if ua.contains("safari") {
        "Safari"
    } else {
        "Unknown"
    };

    (format!("{} on {}", browser, os), device_type)
}
