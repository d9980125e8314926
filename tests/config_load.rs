use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use caption_relay::config::CaptionConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAPTION_CONFIG",
        "CAPTION_INTERVAL_MS",
        "CAPTION_MIN_SPACING_MS",
        "CAPTION_IMAGE_QUALITY",
        "CAPTION_MAX_RETRIES",
        "CAPTION_RETRY_DELAY_MS",
        "CAPTION_HEALTH_INTERVAL_MS",
        "CAPTION_ENDPOINT",
        "CAPTION_PROMPT",
        "CAPTION_SOURCE_URL",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "interval_ms": 5000,
            "min_spacing_ms": 2500,
            "image_quality": 70,
            "max_retries": 4,
            "retry_delay_ms": 250,
            "health_check_interval_ms": 10000,
            "endpoint": "http://gpu-box:8001/",
            "prompt": "describe the scene",
            "source": {
                "url": "http://camera.local/snapshot.jpg",
                "width": 1280,
                "height": 720
            }
        }"#,
    );

    std::env::set_var("CAPTION_CONFIG", file.path());
    std::env::set_var("CAPTION_INTERVAL_MS", "4000");
    std::env::set_var("CAPTION_SOURCE_URL", "stub://desk");

    let cfg = CaptionConfig::load().expect("load config");

    assert_eq!(cfg.interval, Duration::from_millis(4_000));
    assert_eq!(cfg.min_spacing, Duration::from_millis(2_500));
    assert_eq!(cfg.image_quality, 70);
    assert_eq!(cfg.max_retries, 4);
    assert_eq!(cfg.retry_delay, Duration::from_millis(250));
    assert_eq!(cfg.health_check_interval, Duration::from_secs(10));
    assert_eq!(cfg.caption_url(), "http://gpu-box:8001/caption");
    assert_eq!(cfg.health_url(), "http://gpu-box:8001/health");
    assert_eq!(cfg.prompt.as_deref(), Some("describe the scene"));
    assert_eq!(cfg.source.url, "stub://desk");
    assert_eq!((cfg.source.width, cfg.source.height), (1280, 720));

    let schedule = cfg.schedule();
    assert_eq!(schedule.interval, Duration::from_millis(4_000));
    assert_eq!(cfg.retry_policy().delay_after(2), Duration::from_millis(500));

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".toml",
        r#"
interval_ms = 2000
upload_field = "image"
caption_path = "/v1/caption"

[source]
url = "stub://lab"
"#,
    );
    std::env::set_var("CAPTION_CONFIG", file.path());

    let cfg = CaptionConfig::load().expect("load toml config");

    assert_eq!(cfg.interval, Duration::from_millis(2_000));
    assert_eq!(cfg.upload_field, "image");
    assert_eq!(cfg.caption_url(), "http://127.0.0.1:8000/v1/caption");
    assert_eq!(cfg.http_transport().upload_field, "image");
    assert_eq!(cfg.source.url, "stub://lab");

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CaptionConfig::load().expect("load defaults");

    assert_eq!(cfg.interval, Duration::from_millis(3_000));
    assert_eq!(cfg.min_spacing, Duration::from_millis(2_000));
    assert_eq!(cfg.image_quality, 80);
    assert_eq!(cfg.max_retries, 3);
    assert_eq!(cfg.retry_delay, Duration::from_millis(1_000));
    assert_eq!(cfg.health_check_interval, Duration::from_millis(30_000));
    assert_eq!(cfg.encode_options().max_dimension, 512);
    assert!(cfg.prompt.is_none());

    clear_env();
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAPTION_MAX_RETRIES", "lots");
    let err = CaptionConfig::load().unwrap_err();
    assert!(err.to_string().contains("CAPTION_MAX_RETRIES"));

    std::env::set_var("CAPTION_MAX_RETRIES", "0");
    assert!(CaptionConfig::load().is_err());
    std::env::remove_var("CAPTION_MAX_RETRIES");

    std::env::set_var("CAPTION_IMAGE_QUALITY", "101");
    assert!(CaptionConfig::load().is_err());
    std::env::remove_var("CAPTION_IMAGE_QUALITY");

    std::env::set_var("CAPTION_ENDPOINT", "not a url");
    assert!(CaptionConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_unknown_keys() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(".json", r#"{"interval": 3000}"#);
    std::env::set_var("CAPTION_CONFIG", file.path());

    let err = CaptionConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
