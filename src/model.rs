use crate::auth::Credential;
use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::llm::{ChatClient, Endpoint};
use tracing::debug;

/// Build the chat client for the configured provider, bound to `credential`.
///
/// Fails with a config error when a field the provider needs is missing.
pub fn select_model(
    config: &ModelConfig,
    credential: &Credential,
    max_tokens: u32,
    http: HttpClient,
) -> Result<ChatClient> {
    let endpoint = match config {
        ModelConfig::OpenAi(openai) => {
            let api_key = openai.api_key.clone().ok_or_else(|| {
                Error::config("OPENAI_API_KEY is required when MODEL_PROVIDER=openai")
            })?;
            Endpoint::OpenAi {
                base_url: openai.base_url.clone(),
                api_key,
            }
        }
        ModelConfig::Azure(azure) => {
            let project_id = azure.project_id.clone().ok_or_else(|| {
                Error::config("AZURE_PROJECT_ID is required when MODEL_PROVIDER=azure")
            })?;
            Endpoint::Azure {
                endpoint: azure.endpoint.clone(),
                deployment: azure.deployment.clone(),
                api_version: azure.api_version.clone(),
                bearer_token: credential.token.clone(),
                project_id,
            }
        }
    };

    debug!(provider = %config.provider(), model = config.model_id(), "model selected");
    Ok(ChatClient::new(
        endpoint,
        config.model_id().to_string(),
        max_tokens,
        http,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AzureSettings, OpenAiSettings};
    use crate::llm::{ChatModel, Provider};

    fn http() -> HttpClient {
        HttpClient::new("test").unwrap()
    }

    fn azure(project_id: Option<&str>) -> ModelConfig {
        ModelConfig::Azure(AzureSettings {
            project_id: project_id.map(String::from),
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            model_id: "gpt-4.1".into(),
            deployment: "gpt-4.1_2025-04-14".into(),
            api_version: "2025-01-01-preview".into(),
            endpoint: "https://gateway.example".into(),
            token_url: "https://gateway.example/token".into(),
            scope: "scope".into(),
        })
    }

    #[test]
    fn openai_requires_api_key() {
        let config = ModelConfig::OpenAi(OpenAiSettings {
            api_key: None,
            model_id: "gpt-4".into(),
            base_url: "https://api.openai.com/v1".into(),
        });
        let err = select_model(&config, &Credential::non_expiring("x"), 100, http())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn openai_binds_model_id() {
        let config = ModelConfig::OpenAi(OpenAiSettings {
            api_key: Some("sk".into()),
            model_id: "gpt-4o".into(),
            base_url: "https://api.openai.com/v1".into(),
        });
        let client = select_model(&config, &Credential::non_expiring("x"), 100, http()).unwrap();
        assert_eq!(client.model(), "gpt-4o");
        assert_eq!(client.provider(), Provider::OpenAi);
    }

    #[test]
    fn azure_requires_project_id() {
        let err = select_model(&azure(None), &Credential::non_expiring("x"), 100, http())
            .err()
            .unwrap();
        assert!(err.to_string().contains("AZURE_PROJECT_ID"));
    }

    #[test]
    fn azure_binds_current_credential() {
        let cred = Credential::non_expiring("fresh-token");
        let client = select_model(&azure(Some("proj-7")), &cred, 100, http()).unwrap();
        match client.endpoint() {
            Endpoint::Azure {
                bearer_token,
                project_id,
                deployment,
                ..
            } => {
                assert_eq!(bearer_token, "fresh-token");
                assert_eq!(project_id, "proj-7");
                assert_eq!(deployment, "gpt-4.1_2025-04-14");
            }
            other => panic!("unexpected endpoint: {other:?}"),
        }
    }
}
