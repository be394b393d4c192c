use std::sync::Arc;

use camino::Utf8PathBuf;
use chart_getter::{GetterErrorKind, MemoryGetter, OciProvider, Providers};
use helm_package::chart::ChartMetadata;
use helm_package::dependencies::{DependencyError, DependencyManager};
use helm_package::repositories::Repositories;
use registry_config::{MirrorRule, RegistryConfig};

const CHART: &str = r#"
apiVersion: v2
name: web
version: 0.3.0
dependencies:
  - name: db
    version: ^1.0.0
    repository: oci://registry.example.com/charts
  - name: common
    version: 0.1.0
    repository: file://../common
  - name: cache
    version: ~2.1.0
    repository: "@stable"
  - name: vendored
    version: 1.0.0
"#;

const INDEX: &str = r#"
apiVersion: v1
entries:
  cache:
    - name: cache
      version: 2.2.0
      urls: [cache-2.2.0.tgz]
    - name: cache
      version: 2.1.4
      urls: [cache-2.1.4.tgz]
    - name: cache
      version: 2.1.0
      urls: [cache-2.1.0.tgz]
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    chart: Utf8PathBuf,
    registry: Arc<MemoryGetter>,
    web: Arc<MemoryGetter>,
    providers: Providers,
    repositories: Repositories,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap();

        let chart = root.join("web");
        std::fs::create_dir_all(chart.join("charts")).unwrap();
        std::fs::write(chart.join("Chart.yaml"), CHART).unwrap();
        std::fs::write(chart.join("charts/db-0.9.0.tgz"), "stale").unwrap();
        std::fs::write(chart.join("charts/vendored-1.0.0.tgz"), "vendored").unwrap();

        let common = root.join("common");
        std::fs::create_dir_all(common.join("templates")).unwrap();
        std::fs::write(
            common.join("Chart.yaml"),
            "apiVersion: v2\nname: common\nversion: 0.1.0\n",
        )
        .unwrap();
        std::fs::write(common.join("templates/_helpers.tpl"), "{{/* helpers */}}").unwrap();

        let registry = Arc::new(MemoryGetter::new(&["oci"]));
        registry.fail("oci://mirror1.example.com/charts/db", GetterErrorKind::Io);
        registry.insert_tags(
            "oci://mirror2.example.com/charts/db",
            ["0.9.0", "1.0.0", "1.4.2", "2.0.0"],
        );
        registry.fail("oci://mirror1.example.com/charts/db:1.4.2", GetterErrorKind::Io);
        registry.insert("oci://mirror2.example.com/charts/db:1.4.2", "db archive");

        let web = Arc::new(MemoryGetter::new(&["http", "https"]));
        web.insert("https://charts.example.com/stable/index.yaml", INDEX);
        web.insert("https://charts.example.com/stable/cache-2.1.4.tgz", "cache archive");

        let config = RegistryConfig::new(vec![MirrorRule::new(
            "registry.example.com",
            ["mirror1.example.com", "mirror2.example.com"],
        )]);

        let mut providers = Providers::new();
        providers.add(Arc::new(OciProvider::from_config(registry.clone(), Some(config)).unwrap()));
        providers.add(web.clone());

        let repositories: Repositories = serde_yaml::from_str(
            "repositories: [{name: stable, url: 'https://charts.example.com/stable/'}]",
        )
        .unwrap();

        Self {
            _dir: dir,
            chart,
            registry,
            web,
            providers,
            repositories,
        }
    }
}

#[tokio::test]
async fn update_fetches_every_dependency() {
    let fixture = Fixture::new();
    let metadata = ChartMetadata::load(&fixture.chart).unwrap();

    let manager = DependencyManager::new(&fixture.chart, &fixture.providers, &fixture.repositories);
    let written = manager.update(&metadata.dependencies).await.unwrap();

    let charts = fixture.chart.join("charts");
    assert_eq!(
        written,
        vec![
            charts.join("db-1.4.2.tgz"),
            charts.join("common"),
            charts.join("cache-2.1.4.tgz"),
        ]
    );

    assert_eq!(std::fs::read_to_string(charts.join("db-1.4.2.tgz")).unwrap(), "db archive");
    assert_eq!(std::fs::read_to_string(charts.join("cache-2.1.4.tgz")).unwrap(), "cache archive");
    assert!(charts.join("common/templates/_helpers.tpl").exists());

    assert!(!charts.join("db-0.9.0.tgz").exists(), "stale archive removed");
    assert!(charts.join("vendored-1.0.0.tgz").exists(), "vendored archive kept");

    assert_eq!(
        fixture.registry.calls(),
        vec![
            "oci://mirror1.example.com/charts/db",
            "oci://mirror2.example.com/charts/db",
            "oci://mirror1.example.com/charts/db:1.4.2",
            "oci://mirror2.example.com/charts/db:1.4.2",
        ]
    );
    assert_eq!(
        fixture.web.calls(),
        vec![
            "https://charts.example.com/stable/index.yaml",
            "https://charts.example.com/stable/cache-2.1.4.tgz",
        ]
    );
}

#[tokio::test]
async fn exhausted_mirrors_fail_the_update() {
    let fixture = Fixture::new();
    fixture
        .registry
        .fail("oci://mirror2.example.com/charts/db:1.4.2", GetterErrorKind::PermissionDenied);
    let metadata = ChartMetadata::load(&fixture.chart).unwrap();

    let manager = DependencyManager::new(&fixture.chart, &fixture.providers, &fixture.repositories);
    let err = manager.update(&metadata.dependencies).await.unwrap_err();

    let (name, source) = match err {
        DependencyError::Fetch { name, source, .. } => (name, source),
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(name, "db");
    assert_eq!(source.kind(), GetterErrorKind::ResolutionExhausted);
    assert_eq!(source.exhausted().unwrap().attempts().len(), 2);
}

#[tokio::test]
async fn unknown_repository_alias() {
    let fixture = Fixture::new();
    let metadata = ChartMetadata::load(&fixture.chart).unwrap();

    let repositories = Repositories::default();
    let manager = DependencyManager::new(&fixture.chart, &fixture.providers, &repositories);
    let err = manager.update(&metadata.dependencies).await.unwrap_err();

    assert!(matches!(err, DependencyError::UnknownRepository { ref name, .. } if name == "cache"));
    assert!(fixture.registry.calls().is_empty());
    assert!(fixture.chart.join("charts/db-0.9.0.tgz").exists());
}
