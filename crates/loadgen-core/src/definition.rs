use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::DefinitionError;

/// File suffix picked up when scanning a directory for definitions.
pub const DEFINITION_SUFFIX: &str = ".loadtest.toml";

/// What to send for one attempt. `path` is appended to the run's host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }
}

/// The parts of a response a test may inspect to classify it.
#[derive(Debug, Clone, Copy)]
pub struct ResponseSpec<'a> {
    pub status: u16,
    pub headers: &'a HeaderMap,
}

/// A load scenario. One instance is shared by every worker, so
/// implementations must be stateless or internally synchronised.
pub trait LoadTest: Send + Sync {
    fn name(&self) -> &str;

    /// Called once per attempt.
    fn build_request(&self) -> RequestSpec;

    fn is_successful(&self, response: &ResponseSpec<'_>) -> bool {
        (200..300).contains(&response.status)
    }

    /// Legacy per-user think time bounds in ms. Reported only; pacing is
    /// driven by the ramp.
    fn wait_time_ms(&self) -> Option<(u64, u64)> {
        None
    }

    /// Per-test override of the run-wide wait-for-body flag.
    fn wait_for_body(&self) -> Option<bool> {
        None
    }
}

/// GET `/`.
pub struct IndexTest;

impl LoadTest for IndexTest {
    fn name(&self) -> &str {
        "IndexTest"
    }

    fn build_request(&self) -> RequestSpec {
        RequestSpec::get("/")
    }
}

/// GET `/?dynamic=true` with a fixed one second think time hint.
pub struct DynamicPerformanceTest;

impl LoadTest for DynamicPerformanceTest {
    fn name(&self) -> &str {
        "DynamicPerformanceTest"
    }

    fn build_request(&self) -> RequestSpec {
        RequestSpec::get("/?dynamic=true")
    }

    fn wait_time_ms(&self) -> Option<(u64, u64)> {
        Some((1000, 1000))
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// One `[[tests]]` table of a definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDefinition {
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Status codes counted as success; empty means any 2xx
    #[serde(default)]
    pub success_status: Vec<u16>,
    #[serde(default)]
    pub min_wait_ms: Option<u64>,
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
    #[serde(default)]
    pub wait_for_body: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionFile {
    #[serde(default)]
    pub tests: Vec<TestDefinition>,
}

/// A [`LoadTest`] described entirely by data.
#[derive(Debug, Clone)]
pub struct DeclarativeTest {
    name: String,
    request: RequestSpec,
    success_status: Vec<u16>,
    wait_time_ms: Option<(u64, u64)>,
    wait_for_body: Option<bool>,
}

impl DeclarativeTest {
    pub fn from_definition(def: TestDefinition, path: &Path) -> Result<Self, DefinitionError> {
        let method = Method::from_bytes(def.method.to_ascii_uppercase().as_bytes()).map_err(
            |_| DefinitionError::InvalidMethod {
                path: path.to_path_buf(),
                name: def.name.clone(),
                method: def.method.clone(),
            },
        )?;

        let wait_time_ms = match (def.min_wait_ms, def.max_wait_ms) {
            (None, None) => None,
            (min, max) => {
                let min = min.or(max).unwrap_or_default();
                let max = max.unwrap_or(min);
                if min > max {
                    return Err(DefinitionError::InvalidWait {
                        path: path.to_path_buf(),
                        name: def.name,
                    });
                }
                Some((min, max))
            }
        };

        Ok(Self {
            request: RequestSpec {
                method,
                path: def.path,
                headers: def.headers.into_iter().collect(),
                body: def.body,
            },
            name: def.name,
            success_status: def.success_status,
            wait_time_ms,
            wait_for_body: def.wait_for_body,
        })
    }
}

impl LoadTest for DeclarativeTest {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_request(&self) -> RequestSpec {
        self.request.clone()
    }

    fn is_successful(&self, response: &ResponseSpec<'_>) -> bool {
        if self.success_status.is_empty() {
            (200..300).contains(&response.status)
        } else {
            self.success_status.contains(&response.status)
        }
    }

    fn wait_time_ms(&self) -> Option<(u64, u64)> {
        self.wait_time_ms
    }

    fn wait_for_body(&self) -> Option<bool> {
        self.wait_for_body
    }
}

/// Parse every test in a definition file.
pub fn load_definition_file(path: impl AsRef<Path>) -> Result<Vec<DeclarativeTest>, DefinitionError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: DefinitionFile = toml::from_str(&contents).map_err(|source| DefinitionError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    file.tests
        .into_iter()
        .map(|def| DeclarativeTest::from_definition(def, path))
        .collect()
}

pub type TestFactory = Arc<dyn Fn() -> Arc<dyn LoadTest> + Send + Sync>;

/// Name-to-factory map of the tests a run can select from.
#[derive(Clone, Default)]
pub struct TestRegistry {
    factories: HashMap<String, TestFactory>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the compiled-in tests.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("IndexTest", || Arc::new(IndexTest) as Arc<dyn LoadTest>);
        registry.register("DynamicPerformanceTest", || {
            Arc::new(DynamicPerformanceTest) as Arc<dyn LoadTest>
        });
        registry
    }

    /// Later registrations under the same name replace earlier ones.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn LoadTest> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            debug!("Replacing registered test {}", name);
        }
    }

    pub fn register_declarative(&mut self, test: DeclarativeTest) {
        let test = Arc::new(test);
        let name = test.name().to_string();
        self.register(name, move || test.clone() as Arc<dyn LoadTest>);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn LoadTest>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Register all tests from one file. Errors are returned to the caller.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize, DefinitionError> {
        let tests = load_definition_file(path)?;
        let count = tests.len();
        for test in tests {
            self.register_declarative(test);
        }
        Ok(count)
    }

    /// Register tests from every `*.loadtest.toml` directly inside `dir`.
    /// Unreadable or malformed files are skipped with a warning.
    pub fn load_directory(&mut self, dir: impl AsRef<Path>) -> Result<usize, DefinitionError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| DefinitionError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(DEFINITION_SUFFIX))
            })
            .collect();
        files.sort();

        let mut loaded = 0;
        for path in files {
            match self.load_file(&path) {
                Ok(count) => {
                    debug!("Loaded {} tests from {:?}", count, path);
                    loaded += count;
                }
                Err(e) => warn!("Skipping test definitions: {}", e),
            }
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DEFINITIONS: &str = r#"
[[tests]]
name = "Health"
path = "/health"
success_status = [200, 204]
wait_for_body = false

[[tests]]
name = "CreateOrder"
method = "post"
path = "/orders"
body = '{"sku": 1}'
min_wait_ms = 500
max_wait_ms = 1500

[tests.headers]
content-type = "application/json"
"#;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_builtins_resolve() {
        let registry = TestRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["DynamicPerformanceTest", "IndexTest"]);

        let test = registry.resolve("IndexTest").unwrap();
        assert_eq!(test.build_request(), RequestSpec::get("/"));
        assert!(registry.resolve("Missing").is_none());
    }

    #[test]
    fn test_default_success_is_2xx() {
        let headers = HeaderMap::new();
        let ok = ResponseSpec { status: 204, headers: &headers };
        let redirect = ResponseSpec { status: 302, headers: &headers };
        assert!(IndexTest.is_successful(&ok));
        assert!(!IndexTest.is_successful(&redirect));
    }

    #[test]
    fn test_load_definition_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "shop.loadtest.toml", DEFINITIONS);

        let tests = load_definition_file(&path).unwrap();
        assert_eq!(tests.len(), 2);

        let health = &tests[0];
        assert_eq!(health.name(), "Health");
        assert_eq!(health.wait_for_body(), Some(false));
        let headers = HeaderMap::new();
        assert!(health.is_successful(&ResponseSpec { status: 204, headers: &headers }));
        assert!(!health.is_successful(&ResponseSpec { status: 201, headers: &headers }));

        let order = &tests[1];
        let request = order.build_request();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body.as_deref(), Some(r#"{"sku": 1}"#));
        assert_eq!(
            request.headers,
            vec![("content-type".to_string(), "application/json".to_string())]
        );
        assert_eq!(order.wait_time_ms(), Some((500, 1500)));
    }

    #[test]
    fn test_invalid_wait_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "bad.loadtest.toml",
            "[[tests]]\nname = \"Bad\"\npath = \"/\"\nmin_wait_ms = 10\nmax_wait_ms = 5\n",
        );
        assert!(matches!(
            load_definition_file(&path),
            Err(DefinitionError::InvalidWait { .. })
        ));
    }

    #[test]
    fn test_invalid_method() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "bad.loadtest.toml",
            "[[tests]]\nname = \"Bad\"\nmethod = \"G ET\"\npath = \"/\"\n",
        );
        assert!(matches!(
            load_definition_file(&path),
            Err(DefinitionError::InvalidMethod { .. })
        ));
    }

    #[test]
    fn test_load_directory_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "shop.loadtest.toml", DEFINITIONS);
        write_file(dir.path(), "broken.loadtest.toml", "[[tests]]\nname = ");
        write_file(dir.path(), "ignored.toml", "[[tests]]\nname = \"Nope\"\npath = \"/\"\n");

        let mut registry = TestRegistry::with_builtins();
        let loaded = registry.load_directory(dir.path()).unwrap();

        assert_eq!(loaded, 2);
        assert!(registry.contains("Health"));
        assert!(registry.contains("CreateOrder"));
        assert!(!registry.contains("Nope"));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_explicit_file_errors_propagate() {
        let mut registry = TestRegistry::new();
        assert!(matches!(
            registry.load_file("/definitely/not/here.loadtest.toml"),
            Err(DefinitionError::Io { .. })
        ));
        assert!(registry.is_empty());
    }
}
