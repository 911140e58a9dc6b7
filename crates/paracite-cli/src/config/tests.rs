#[cfg(test)]
mod tests {
    use super::super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    #[test]
    fn test_empty_file_gives_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.llm.provider, LlmProvider::Openrouter);
        assert_eq!(cfg.llm.model, "nvidia/nemotron-nano-9b-v2:free");
        assert_eq!(cfg.embedding.provider, EmbeddingProvider::Ollama);
        assert_eq!(cfg.embedding.dim, Some(384));
        assert_eq!(cfg.search.source, SearchSource::Arxiv);
        assert_eq!(cfg.pipeline.top_k, 3);
    }

    #[test]
    fn test_full_file_parses() {
        let cfg = Config::from_toml_str(
            r#"
            [pipeline]
            top_k = 5
            concurrency_limit = 8
            similarity_floor = 0.2

            [pipeline.backoff]
            max_attempts = 4

            [llm]
            provider = "anthropic"
            model = "claude-3-5-haiku-latest"
            api_key = "sk-test"

            [embedding]
            provider = "openai_compatible"
            model = "bge-small"
            base_url = "http://localhost:1234"

            [search]
            source = "crossref"
            mailto = "dev@example.org"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.pipeline.top_k, 5);
        assert_eq!(cfg.pipeline.concurrency_limit, 8);
        assert_eq!(cfg.pipeline.backoff.max_attempts, 4);
        assert_eq!(cfg.pipeline.backoff.base_delay_ms, 500);
        assert_eq!(cfg.llm.provider, LlmProvider::Anthropic);
        assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.embedding.provider, EmbeddingProvider::OpenaiCompatible);
        assert_eq!(cfg.embedding.dim, Some(384));
        assert_eq!(cfg.search.source, SearchSource::Crossref);
        assert_eq!(cfg.search.mailto.as_deref(), Some("dev@example.org"));
    }

    #[test]
    fn test_invalid_pipeline_values_rejected() {
        assert!(Config::from_toml_str("[pipeline]\ntop_k = 0").is_err());
        assert!(Config::from_toml_str("[llm]\nprovider = \"gemini\"").is_err());
    }

    #[test]
    fn test_arxiv_caps_search_rate() {
        let cfg = Config::from_toml_str("[pipeline]\nsearch_rate_limit_rps = 5.0").unwrap();
        assert_eq!(cfg.effective_pipeline().search_rate_limit_rps, ARXIV_RATE_LIMIT_RPS);

        let cfg = Config::from_toml_str(
            "[pipeline]\nsearch_rate_limit_rps = 5.0\n[search]\nsource = \"crossref\"",
        )
        .unwrap();
        assert_eq!(cfg.effective_pipeline().search_rate_limit_rps, 5.0);
    }

    #[test]
    fn test_file_key_wins_over_env() {
        let key = resolve_api_key(Some("file-key"), "PARACITE_TEST_UNSET_KEY").unwrap();
        assert_eq!(key.expose_secret(), "file-key");
        assert!(resolve_api_key(None, "PARACITE_TEST_UNSET_KEY").is_none());
        assert!(resolve_api_key(Some("  "), "PARACITE_TEST_UNSET_KEY").is_none());
    }

    #[test]
    fn test_key_env_var_per_provider() {
        let llm = LlmSettings { provider: LlmProvider::Openai, ..Default::default() };
        assert_eq!(llm.key_env_var(), "PARACITE_OPENAI_API_KEY");
    }
}
