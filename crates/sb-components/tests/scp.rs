//! scp connector against a scripted session transport

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sb_common::{ConfigurationError, ErrorKind, LifecycleError, SwitchboardError};
use sb_components::scp::{
    self, log_session_event, ScpSession, ScpSettings, ScpTarget, SessionFactory, SessionLogLevel,
};
use sb_components::{register_components, register_scp};
use sb_config::EngineConfig;
use sb_core::{Component, ComponentContext, Engine, Pipeline, Service, ServiceState};

#[derive(Default)]
struct Script {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    fail_directory: bool,
    fail_upload: bool,
    targets: Mutex<Vec<ScpTarget>>,
    uploads: Mutex<Vec<(String, u32, Bytes)>>,
}

struct ScriptedFactory {
    script: Arc<Script>,
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn connect(&self, target: &ScpTarget) -> anyhow::Result<Box<dyn ScpSession>> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        self.script.targets.lock().push(target.clone());
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            connected: true,
        }))
    }
}

struct ScriptedSession {
    script: Arc<Script>,
    connected: bool,
}

#[async_trait]
impl ScpSession for ScriptedSession {
    async fn ensure_directory(&mut self, directory: &str) -> anyhow::Result<()> {
        if self.script.fail_directory {
            anyhow::bail!("permission denied: {}", directory);
        }
        Ok(())
    }

    async fn send_file(&mut self, path: &str, mode: u32, contents: Bytes) -> anyhow::Result<()> {
        if self.script.fail_upload {
            anyhow::bail!("disk full");
        }
        self.script
            .uploads
            .lock()
            .push((path.to_string(), mode, contents));
        Ok(())
    }

    async fn disconnect(&mut self) -> anyhow::Result<()> {
        self.connected = false;
        log_session_event(SessionLogLevel::Info, "Disconnecting from files.internal");
        self.script.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

fn lenient() -> Arc<ScpSettings> {
    Arc::new(ScpSettings {
        strict_host_key_checking: false,
        known_hosts_file: None,
    })
}

fn engine(settings: Arc<ScpSettings>, script: Arc<Script>) -> Engine {
    let engine = Engine::new(EngineConfig {
        shutdown_timeout_ms: 500,
        ..EngineConfig::default()
    });
    register_components(engine.registry());
    register_scp(engine.registry(), settings, Arc::new(ScriptedFactory { script }));
    engine
}

const UPLOAD_URI: &str =
    "scp://deploy@files.internal:2222/inbox?password=p%40ss%2Bword&chmod=640";

#[tokio::test]
async fn test_upload_through_route() {
    let script = Arc::new(Script::default());
    let engine = engine(lenient(), script.clone());

    let upload = engine.to(UPLOAD_URI).await.unwrap();
    assert_eq!(script.connects.load(Ordering::SeqCst), 0);

    let route = engine
        .build_route("upload", "direct:upload", Pipeline::empty().then(upload))
        .await
        .unwrap();
    engine.add_route(route).await.unwrap();
    engine.start().await.unwrap();

    let exchange = engine
        .send_body(
            "direct:upload",
            "payload",
            vec![("fileName".to_string(), "report.csv".into())],
        )
        .await
        .unwrap();
    assert!(!exchange.is_failed());

    {
        let targets = script.targets.lock();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].host, "files.internal");
        assert_eq!(targets[0].port, 2222);
        assert_eq!(targets[0].username.as_deref(), Some("deploy"));
        assert_eq!(targets[0].password.as_deref(), Some("p@ss+word"));
    }
    assert_eq!(
        *script.uploads.lock(),
        vec![("inbox/report.csv".to_string(), 0o640, Bytes::from("payload"))]
    );

    engine.stop().await.unwrap();
    assert_eq!(script.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_upload_fails_exchange() {
    let script = Arc::new(Script {
        fail_upload: true,
        ..Script::default()
    });
    let engine = engine(lenient(), script.clone());
    engine.start().await.unwrap();

    let exchange = engine.send_body(UPLOAD_URI, "payload", Vec::new()).await.unwrap();

    let err = exchange.exception().unwrap();
    assert_eq!(err.kind, ErrorKind::Io);
    assert!(err.message.contains("disk full"));

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_directory_failure_releases_session() {
    let script = Arc::new(Script {
        fail_directory: true,
        ..Script::default()
    });
    let engine = engine(lenient(), script.clone());
    engine.start().await.unwrap();

    let err = engine
        .send_body(UPLOAD_URI, "payload", Vec::new())
        .await
        .err()
        .unwrap();

    assert!(matches!(
        err,
        SwitchboardError::Lifecycle(LifecycleError::Resource { .. })
    ));
    assert_eq!(script.connects.load(Ordering::SeqCst), 1);
    assert_eq!(script.disconnects.load(Ordering::SeqCst), 1);
    assert!(script.uploads.lock().is_empty());

    engine.stop().await.unwrap();
    assert_eq!(script.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_strict_host_key_checking_requires_known_hosts() {
    let script = Arc::new(Script::default());
    let engine = engine(Arc::new(ScpSettings::default()), script.clone());

    let err = engine.endpoint("scp://files.internal/inbox").await.err().unwrap();

    assert!(matches!(
        err,
        SwitchboardError::Configuration(ConfigurationError::Invalid { .. })
    ));
    assert_eq!(script.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_settings_bootstrapped_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
name = "uploader"

[components.scp]
strictHostKeyChecking = "yes"
knownHostsFile = "/etc/ssh/ssh_known_hosts"
"#
    )
    .unwrap();

    let config = EngineConfig::load(file.path()).unwrap();
    let settings = Arc::new(ScpSettings::bootstrap(&config).unwrap());
    let script = Arc::new(Script::default());
    let engine = engine(settings, script);

    let endpoint = engine.endpoint("scp://files.internal/inbox").await.unwrap();
    assert_eq!(endpoint.uri(), "scp://files.internal/inbox");
}

#[tokio::test]
async fn test_component_stop_closes_open_sessions() {
    let script = Arc::new(Script::default());
    let component = scp::component(
        lenient(),
        Arc::new(ScriptedFactory {
            script: script.clone(),
        }),
        ComponentContext::default(),
    );
    component.start().await.unwrap();

    let endpoint = component.create_endpoint(UPLOAD_URI).await.unwrap();
    endpoint.start().await.unwrap();
    let producer = endpoint.clone().create_producer().unwrap();
    producer.start().await.unwrap();
    assert_eq!(component.strategy().open_sessions(), 1);

    component.stop().await.unwrap();

    assert_eq!(component.strategy().open_sessions(), 0);
    assert_eq!(script.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(endpoint.state(), ServiceState::Stopped);
    assert!(component.endpoints().is_empty());
}
