use bytes::Bytes;
use futures::StreamExt;
use jig_core::JigError;
use jig_runtime::{ByteStream, ContainerRuntime, ContainerSpec, MemoryRuntime, Op};
use std::collections::BTreeMap;

fn body(bytes: &'static [u8]) -> ByteStream {
    futures::stream::iter([Ok(Bytes::from_static(bytes))]).boxed()
}

fn spec(name: &str, service: &str) -> ContainerSpec {
    ContainerSpec {
        name: name.to_string(),
        image: format!("{service}:latest"),
        labels: BTreeMap::from([("jig.name".to_string(), service.to_string())]),
        ..Default::default()
    }
}

#[tokio::test]
async fn lifecycle_is_recorded() {
    let rt = MemoryRuntime::new();
    rt.add_image("web:latest");
    let id = rt.create_container(&spec("web", "web")).await.unwrap();
    rt.start_container(&id).await.unwrap();
    rt.stop_container("web").await.unwrap();
    rt.rename_container(&id, "web-prev").await.unwrap();
    rt.remove_container("web-prev").await.unwrap();

    assert_eq!(
        rt.calls(),
        vec![
            "create web",
            "start web",
            "stop web",
            "rename web -> web-prev",
            "remove web-prev",
        ]
    );
    assert!(rt.container_names().is_empty());
}

#[tokio::test]
async fn names_are_unique() {
    let rt = MemoryRuntime::new();
    rt.add_image("web:latest");
    rt.create_container(&spec("web", "web")).await.unwrap();
    assert!(rt.create_container(&spec("web", "web")).await.is_err());

    rt.add_container(spec("web-prev", "web"), false);
    let err = rt.rename_container("web", "web-prev").await.unwrap_err();
    assert!(err.to_string().contains("rename web -> web-prev"));
}

#[tokio::test]
async fn create_requires_image() {
    let rt = MemoryRuntime::new();
    assert!(rt.create_container(&spec("web", "web")).await.is_err());
}

#[tokio::test]
async fn label_filter_and_running_only() {
    let rt = MemoryRuntime::new();
    rt.add_container(spec("web", "web"), true);
    rt.add_container(spec("web-prev", "web"), false);
    rt.add_container(spec("db", "db"), true);
    rt.add_container(ContainerSpec { name: "traefik".into(), ..Default::default() }, true);

    let labelled = rt.list_containers(Some("jig.name"), true).await.unwrap();
    assert_eq!(labelled.len(), 3);

    let web = rt.list_containers(Some("jig.name=web"), true).await.unwrap();
    assert_eq!(web.len(), 2);

    let running = rt.list_containers(Some("jig.name"), false).await.unwrap();
    let names: Vec<&str> = running.iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["web", "db"]);
}

#[tokio::test]
async fn injected_failure_names_step() {
    let rt = MemoryRuntime::new();
    rt.add_container(spec("web", "web"), true);
    rt.fail(Op::Stop, "web", "daemon gone");
    let err = rt.stop_container("web").await.unwrap_err();
    assert!(matches!(err, JigError::Runtime(ref m) if m == "stop web: daemon gone"));
    assert!(rt.is_running("web"));

    rt.clear_failures();
    rt.stop_container("web").await.unwrap();
    assert!(!rt.is_running("web"));
}

#[tokio::test]
async fn build_registers_image_or_reports_error_event() {
    let rt = MemoryRuntime::new();
    let events: Vec<_> = rt.build_image(body(b"ctx"), "web:latest").collect().await;
    assert!(events.iter().all(|e| e.as_ref().is_ok_and(|e| !e.is_error())));
    assert!(rt.images().contains(&"web:latest".to_string()));

    rt.fail(Op::Build, "api:latest", "COPY failed");
    let events: Vec<_> = rt.build_image(body(b""), "api:latest").collect().await;
    let last = events.last().unwrap().as_ref().unwrap();
    assert_eq!(last.error.as_deref(), Some("COPY failed"));
    assert!(!rt.images().contains(&"api:latest".to_string()));
}

#[tokio::test]
async fn load_reads_references() {
    let rt = MemoryRuntime::new();
    let report = rt.load_image(body(b"web:latest\n")).await.unwrap();
    assert_eq!(report, "Loaded image: web:latest");
    assert!(rt.image_exists("web:latest").await.unwrap());
    assert!(rt.load_image(body(b"")).await.is_err());
}

#[tokio::test]
async fn find_container_by_name() {
    let rt = MemoryRuntime::new();
    let id = rt.add_container(spec("web", "web"), true);
    let found = rt.find_container("web").await.unwrap().unwrap();
    assert_eq!(found.id, id);
    assert!(rt.find_container("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn broken_upload_fails_load_and_build() {
    let rt = MemoryRuntime::new();
    let broken = || -> ByteStream {
        futures::stream::iter([
            Ok(Bytes::from_static(b"web:latest\n")),
            Err(JigError::Internal("client went away".into())),
        ])
        .boxed()
    };

    let err = rt.load_image(broken()).await.unwrap_err();
    assert!(matches!(err, JigError::Internal(_)));
    assert!(rt.images().is_empty());

    let events: Vec<_> = rt.build_image(broken(), "web:latest").collect().await;
    assert!(matches!(events.as_slice(), [Err(JigError::Internal(_))]));
    assert!(rt.images().is_empty());
}
