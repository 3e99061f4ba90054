use crate::{config, error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration. The upstream credential is never echoed; only
/// whether one is present.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let upstream = serde_json::to_value(&config.upstream)?;
    let session = serde_json::to_value(&config.session)?;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "upstream": upstream,
            "session": session,
            "credential": {
                "env": config::CREDENTIAL_ENV,
                "configured": config::credential_configured()
            }
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_config_hides_credential() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(AppConfig::default())))
                .route("/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["config"]["upstream"]["sample_rate"], 16000);
        assert_eq!(body["config"]["session"]["pending_audio_frames"], 0);
        assert_eq!(body["config"]["credential"]["env"], "ELEVENLABS_API_KEY");
        assert!(body["config"]["credential"].get("value").is_none());
    }
}
