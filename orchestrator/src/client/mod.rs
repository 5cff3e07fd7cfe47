//! HTTP clients for the collaborator APIs: batch room creation and the
//! agent control plane.

pub mod daily;
pub mod pipecat;

pub use daily::DailyRoomsClient;
pub use pipecat::PipecatCloudClient;

fn bearer(api_key: &str) -> String {
    format!("Bearer {api_key}")
}

fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_without_double_slashes() {
        assert_eq!(
            join_url("https://api.daily.co/v1/", "/batch/rooms"),
            "https://api.daily.co/v1/batch/rooms"
        );
        assert_eq!(join_url("http://127.0.0.1:9000", "x"), "http://127.0.0.1:9000/x");
    }
}
