//! End-to-end batches against a mock environment: the chef materializes real files into
//! a temporary cache, while environment mutations are recorded instead of applied.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use fs_err as fs;
use indoc::indoc;
use serde_json::json;
use url::Url;

use sous_cache::Cache;
use sous_chef::{ArchiveIndex, Chef, IndexError};
use sous_installer::{
    BufferedSink, Environment, EnvironmentError, Executor, Operation, Virtualenv,
};
use sous_traits::{BuildContext, Fetch};
use sous_types::{Package, PackageName, Version};

/// One recorded environment mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Installer(Vec<String>),
    InstallArchive(String),
    Remove(String),
}

/// Records every mutation and answers with configured exit codes.
///
/// Keys are matched as substrings of the call's rendering, so a behavior keyed by a
/// package name applies to whichever primitive that package reaches.
#[derive(Default)]
struct MockEnv {
    calls: Mutex<Vec<Call>>,
    codes: Mutex<Vec<(String, i32)>>,
    failures: Mutex<Vec<(String, String)>>,
    slow: Mutex<Vec<String>>,
    events: Mutex<Vec<String>>,
    metadata_root: Option<PathBuf>,
}

impl MockEnv {
    fn new() -> Self {
        Self::default()
    }

    /// Act like a real virtual environment rooted at `root`: report `is_venv` and hand
    /// out metadata directories under it.
    fn venv(root: impl Into<PathBuf>) -> Self {
        Self {
            metadata_root: Some(root.into()),
            ..Self::default()
        }
    }

    fn with_code(self, key: &str, code: i32) -> Self {
        lock(&self.codes).push((key.to_string(), code));
        self
    }

    fn with_failure(self, key: &str, message: &str) -> Self {
        lock(&self.failures).push((key.to_string(), message.to_string()));
        self
    }

    /// Make calls matching `key` pause mid-flight, to give concurrent operations a
    /// window to interleave.
    fn with_slow(self, key: &str) -> Self {
        lock(&self.slow).push(key.to_string());
        self
    }

    fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    fn respond(&self, rendered: &str) -> Result<i32, EnvironmentError> {
        lock(&self.events).push(format!("begin {rendered}"));
        if lock(&self.slow)
            .iter()
            .any(|key| rendered.contains(key.as_str()))
        {
            std::thread::sleep(Duration::from_millis(50));
        }
        let result = if let Some((_, message)) = lock(&self.failures)
            .iter()
            .find(|(key, _)| rendered.contains(key.as_str()))
        {
            Err(EnvironmentError::Failure(message.clone()))
        } else {
            Ok(lock(&self.codes)
                .iter()
                .find(|(key, _)| rendered.contains(key.as_str()))
                .map_or(0, |(_, code)| *code))
        };
        lock(&self.events).push(format!("end {rendered}"));
        result
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Environment for MockEnv {
    fn run_installer(&self, args: &[String]) -> Result<i32, EnvironmentError> {
        let rendered = args.join(" ");
        lock(&self.calls).push(Call::Installer(args.to_vec()));
        self.respond(&rendered)
    }

    fn install_archive(&self, archive: &Path) -> Result<i32, EnvironmentError> {
        let name = archive
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        lock(&self.calls).push(Call::InstallArchive(name.clone()));
        self.respond(&name)
    }

    fn remove_distribution(
        &self,
        name: &PackageName,
        _version: &Version,
    ) -> Result<i32, EnvironmentError> {
        lock(&self.calls).push(Call::Remove(name.to_string()));
        self.respond(name.as_str())
    }

    fn metadata_directory(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<PathBuf, EnvironmentError> {
        let Some(root) = &self.metadata_root else {
            return Err(EnvironmentError::MissingMetadataDir {
                name: name.clone(),
                version: version.clone(),
            });
        };
        let dist_info =
            root.join(format!("{}-{}.dist-info", name.as_str().replace('-', "_"), version));
        fs::create_dir_all(&dist_info)?;
        Ok(dist_info)
    }

    fn is_venv(&self) -> bool {
        self.metadata_root.is_some()
    }
}

/// Writes a placeholder wheel instead of invoking a real build backend.
#[derive(Default)]
struct StubContext {
    checkouts: Arc<AtomicUsize>,
}

impl BuildContext for StubContext {
    fn build_directory<'a>(
        &'a self,
        _source: &'a Path,
        wheel_dir: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let filename = "built-0.0.0-py3-none-any.whl".to_string();
            fs::write(wheel_dir.join(&filename), b"wheel")?;
            Ok(filename)
        })
    }

    fn checkout<'a>(
        &'a self,
        _url: &'a Url,
        reference: Option<&'a str>,
        target: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<Fetch>> + Send + 'a>> {
        Box::pin(async move {
            self.checkouts.fetch_add(1, Ordering::SeqCst);
            fs::create_dir_all(target)?;
            Ok(Fetch {
                path: target.to_path_buf(),
                commit: format!("deadbeef-{}", reference.unwrap_or("HEAD")),
            })
        })
    }
}

/// Fails the test if anything reaches out to the index.
struct PanickingIndex;

impl ArchiveIndex for PanickingIndex {
    fn find_archive(&self, name: &PackageName, _version: &Version) -> Result<Url, IndexError> {
        panic!("unexpected index lookup for `{name}`");
    }
}

fn chef() -> Chef<StubContext> {
    Chef::new(
        Cache::temp().unwrap(),
        Arc::new(PanickingIndex),
        StubContext::default(),
    )
}

/// Seed the cache as if the package's archive had been fully materialized earlier.
fn seed(chef: &Chef<StubContext>, package: &Package) {
    let shard = chef.get_cache_directory_for(package);
    fs::create_dir_all(shard.as_ref()).unwrap();
    let filename = format!(
        "{}-{}-py3-none-any.whl",
        package.name().as_str().replace('-', "_"),
        package.version(),
    );
    fs::write(shard.join(filename), b"archive").unwrap();
}

fn lines_of(contents: &str) -> Vec<&str> {
    contents.lines().collect()
}

#[tokio::test]
async fn executes_a_batch_of_operations() -> Result<()> {
    let fixtures = tempfile::tempdir()?;
    let archive = fixtures.path().join("demo-0.1.0-py3-none-any.whl");
    fs::write(&archive, b"wheel")?;
    let tree = fixtures.path().join("simple-project");
    fs::create_dir_all(&tree)?;
    let editable_tree = fixtures.path().join("editable-project");
    fs::create_dir_all(&editable_tree)?;

    let chef = chef();
    let pytest = Package::registry("pytest", "3.5.2");
    let attrs_old = Package::registry("attrs", "17.4.0");
    let attrs_new = Package::registry("attrs", "18.0.0");
    seed(&chef, &pytest);
    seed(&chef, &attrs_new);

    let git_url = Url::parse("https://github.com/demo/cachy.git")?;
    let operations = vec![
        Operation::install(Package::file("demo", "0.1.0", &archive)),
        Operation::install(Package::directory("simple-project", "1.2.3", &tree, false)),
        Operation::install(Package::directory(
            "editable-project",
            "1.2.3",
            &editable_tree,
            true,
        )),
        Operation::install(Package::git("cachy", "0.2.0", git_url, "master", false)),
        Operation::install(pytest),
        Operation::update(attrs_old, attrs_new),
        Operation::uninstall(Package::registry("clikit", "0.2.3")).skip("Not currently installed"),
    ];

    let env = Arc::new(MockEnv::new());
    let sink = BufferedSink::new();
    let executor = Executor::new(env.clone(), chef, sink.clone());
    assert_eq!(executor.execute(operations).await, 0);

    let contents = sink.contents();
    let lines = lines_of(&contents);
    assert_eq!(lines[0], "");
    assert_eq!(
        lines[1],
        "Package operations: 5 installs, 1 update, 0 removals"
    );
    assert_eq!(lines[2], "");
    // Operations run concurrently: order is not guaranteed past the summary.
    for expected in [
        format!("  • Installing demo (0.1.0 {})", archive.display()),
        format!("  • Installing simple-project (1.2.3 {})", tree.display()),
        format!(
            "  • Installing editable-project (1.2.3 {})",
            editable_tree.display()
        ),
        "  • Installing cachy (0.2.0 master)".to_string(),
        "  • Installing pytest (3.5.2)".to_string(),
        "  • Updating attrs (17.4.0 -> 18.0.0)".to_string(),
    ] {
        assert!(lines[3..].contains(&expected.as_str()), "missing {expected:?}");
    }
    // Not verbose: the skipped removal leaves no trace.
    assert_eq!(lines.len(), 9);
    assert!(!contents.contains("clikit"));

    let calls = env.calls();
    let archives = calls
        .iter()
        .filter(|call| matches!(call, Call::InstallArchive(_)))
        .count();
    // file, directory, git, pytest, and the new attrs.
    assert_eq!(archives, 5);
    assert!(
        calls
            .iter()
            .any(|call| matches!(call, Call::Installer(args) if args.contains(&"-e".to_string())))
    );
    assert!(calls.contains(&Call::Remove("attrs".to_string())));
    assert!(!calls.contains(&Call::Remove("clikit".to_string())));
    Ok(())
}

#[tokio::test]
async fn empty_batches_are_silent() {
    let sink = BufferedSink::new();
    let executor = Executor::new(Arc::new(MockEnv::new()), chef(), sink.clone());
    assert_eq!(executor.execute(Vec::new()).await, 0);
    assert_eq!(sink.contents(), "");
}

#[tokio::test]
async fn verbose_mode_reports_skip_reasons() {
    let env = Arc::new(MockEnv::new());
    let sink = BufferedSink::new();
    let executor = Executor::new(env.clone(), chef(), sink.clone()).verbose(true);

    let operations = vec![
        Operation::uninstall(Package::registry("clikit", "0.2.3")).skip("Not currently installed"),
    ];
    assert_eq!(executor.execute(operations).await, 0);

    assert_eq!(
        sink.contents(),
        indoc! {"

            Package operations: 0 installs, 0 updates, 0 removals, 1 skipped

              • Removing clikit (0.2.3): Skipped for the following reason: Not currently installed
        "}
    );
    assert!(env.calls().is_empty());
}

#[tokio::test]
async fn failures_are_reported_under_an_exception_header() {
    let chef = chef();
    let pytest = Package::registry("pytest", "3.5.2");
    seed(&chef, &pytest);

    let env = Arc::new(MockEnv::new().with_failure("pytest", "It failed!"));
    let sink = BufferedSink::new();
    let executor = Executor::new(env.clone(), chef, sink.clone());
    assert_eq!(executor.execute(vec![Operation::install(pytest)]).await, 1);

    assert_eq!(
        sink.contents(),
        indoc! {"

            Package operations: 1 install, 0 updates, 0 removals

              • Installing pytest (3.5.2)

              Exception

              It failed!
        "}
    );
}

#[tokio::test]
async fn nonzero_exit_codes_fail_the_operation() {
    let chef = chef();
    let pytest = Package::registry("pytest", "3.5.2");
    seed(&chef, &pytest);

    let env = Arc::new(MockEnv::new().with_code("pytest", 1));
    let sink = BufferedSink::new();
    let executor = Executor::new(env.clone(), chef, sink.clone());
    assert_eq!(executor.execute(vec![Operation::install(pytest)]).await, 1);

    assert!(
        sink.contents()
            .contains("  The installer exited with status 1")
    );
}

#[tokio::test]
async fn interrupted_operations_are_cancelled() {
    let chef = chef();
    let pytest = Package::registry("pytest", "3.5.2");
    seed(&chef, &pytest);

    let env = Arc::new(MockEnv::new().with_code("pytest", -2));
    let sink = BufferedSink::new();
    let executor = Executor::new(env.clone(), chef, sink.clone());
    assert_eq!(executor.execute(vec![Operation::install(pytest)]).await, 1);

    assert_eq!(
        sink.contents(),
        indoc! {"

            Package operations: 1 install, 0 updates, 0 removals

              • Installing pytest (3.5.2)
              • Installing pytest (3.5.2): Cancelled
        "}
    );
}

#[tokio::test]
async fn failed_and_cancelled_operations_both_count() -> Result<()> {
    let chef = chef();
    let pytest = Package::registry("pytest", "3.5.2");
    let attrs = Package::registry("attrs", "18.0.0");
    seed(&chef, &pytest);
    seed(&chef, &attrs);

    let env = Arc::new(MockEnv::new().with_code("pytest", -2).with_code("attrs", 1));
    let executor = Executor::new(env, chef, BufferedSink::new());
    let operations = vec![Operation::install(pytest), Operation::install(attrs)];
    assert_eq!(executor.execute(operations).await, 2);
    Ok(())
}

#[tokio::test]
async fn undecodable_output_fails_the_operation() {
    let chef = chef();
    let pytest = Package::registry("pytest", "3.5.2");
    seed(&chef, &pytest);

    let env = Arc::new(MockEnv::new());
    let sink = BufferedSink::new().ascii_only();
    let executor = Executor::new(env.clone(), chef, sink.clone());
    assert_eq!(executor.execute(vec![Operation::install(pytest)]).await, 1);

    // The progress bullet is unrepresentable; the failure report itself is escaped into
    // plain ASCII and comes through.
    let contents = sink.contents();
    assert!(contents.contains("  Exception"));
    assert!(contents.contains("Unable to encode output"));
    assert!(env.calls().is_empty());
}

#[tokio::test]
async fn updates_remove_the_old_version_before_installing() -> Result<()> {
    let chef = chef();
    let attrs_old = Package::registry("attrs", "17.4.0");
    let attrs_new = Package::registry("attrs", "18.0.0");
    seed(&chef, &attrs_new);

    let env = Arc::new(MockEnv::new());
    let executor = Executor::new(env.clone(), chef, BufferedSink::new());
    let operations = vec![Operation::update(attrs_old, attrs_new)];
    assert_eq!(executor.execute(operations).await, 0);

    assert_eq!(
        env.calls(),
        vec![
            Call::Remove("attrs".to_string()),
            Call::InstallArchive("attrs-18.0.0-py3-none-any.whl".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_name_operations_never_interleave() -> Result<()> {
    let chef = chef();
    let pytest = Package::registry("pytest", "3.5.2");
    seed(&chef, &pytest);

    let env = Arc::new(MockEnv::new().with_slow("pytest"));
    let executor = Executor::new(env.clone(), chef, BufferedSink::new()).with_concurrency(2);
    let operations = vec![
        Operation::uninstall(Package::registry("pytest", "3.5.1")),
        Operation::install(pytest),
    ];
    assert_eq!(executor.execute(operations).await, 0);

    // Each mutation pauses mid-flight; if the per-name lock did not serialize them, a
    // `begin` would land between another call's `begin` and `end`.
    let events = env.events();
    assert_eq!(events.len(), 4, "{events:?}");
    for pair in events.chunks(2) {
        assert!(pair[0].starts_with("begin "), "{events:?}");
        assert!(pair[1].starts_with("end "), "{events:?}");
        assert_eq!(pair[0]["begin ".len()..], pair[1]["end ".len()..], "{events:?}");
    }
    Ok(())
}

#[tokio::test]
async fn git_installs_check_out_once() -> Result<()> {
    let checkouts = Arc::new(AtomicUsize::new(0));
    let chef = Chef::new(
        Cache::temp()?,
        Arc::new(PanickingIndex),
        StubContext {
            checkouts: checkouts.clone(),
        },
    );

    let env = Arc::new(MockEnv::new());
    let executor = Executor::new(env.clone(), chef, BufferedSink::new());
    let url = Url::parse("https://github.com/demo/cachy.git")?;
    let operations = vec![Operation::install(Package::git(
        "cachy", "0.2.0", url, "master", false,
    ))];
    assert_eq!(executor.execute(operations).await, 0);

    // Pinning the commit and building the artifact share one working copy.
    assert_eq!(checkouts.load(Ordering::SeqCst), 1);
    assert_eq!(
        env.calls(),
        vec![Call::InstallArchive("built-0.0.0-py3-none-any.whl".to_string())]
    );
    Ok(())
}

#[tokio::test]
async fn direct_origins_are_stamped_into_the_environment() -> Result<()> {
    let fixtures = tempfile::tempdir()?;
    let archive = fixtures.path().join("demo-0.1.0-py3-none-any.whl");
    fs::write(&archive, b"wheel")?;
    let editable_tree = fixtures.path().join("simple_project");
    fs::create_dir_all(&editable_tree)?;

    let site_packages = tempfile::tempdir()?;
    let env = Arc::new(MockEnv::venv(site_packages.path()));
    let chef = chef();
    let pytest = Package::registry("pytest", "3.5.2");
    seed(&chef, &pytest);

    let git_url = Url::parse("https://github.com/demo/demo.git")?;
    let operations = vec![
        Operation::install(Package::file("demo", "0.1.0", &archive)),
        Operation::install(Package::directory(
            "simple-project",
            "1.2.3",
            &editable_tree,
            true,
        )),
        Operation::install(Package::git("cachy", "0.2.0", git_url, "master", false)),
        Operation::install(pytest),
    ];
    let executor = Executor::new(env, chef, BufferedSink::new());
    assert_eq!(executor.execute(operations).await, 0);

    let record = |dist_info: &str| -> serde_json::Value {
        let path = site_packages.path().join(dist_info).join("direct_url.json");
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    };

    assert_eq!(
        record("demo-0.1.0.dist-info"),
        json!({
            "archive_info": {},
            "url": Url::from_file_path(&archive).unwrap().to_string(),
        })
    );
    assert_eq!(
        record("simple_project-1.2.3.dist-info"),
        json!({
            "dir_info": { "editable": true },
            "url": Url::from_file_path(&editable_tree).unwrap().to_string(),
        })
    );
    assert_eq!(
        record("cachy-0.2.0.dist-info"),
        json!({
            "vcs_info": {
                "vcs": "git",
                "requested_revision": "master",
                "commit_id": "deadbeef-master",
            },
            "url": "https://github.com/demo/demo.git",
        })
    );
    // Registry installs have no direct origin.
    assert!(
        !site_packages
            .path()
            .join("pytest-3.5.2.dist-info")
            .join("direct_url.json")
            .exists()
    );
    Ok(())
}

#[tokio::test]
async fn test_doubles_are_never_stamped() -> Result<()> {
    let fixtures = tempfile::tempdir()?;
    let archive = fixtures.path().join("demo-0.1.0-py3-none-any.whl");
    fs::write(&archive, b"wheel")?;

    let env = Arc::new(MockEnv::new());
    let executor = Executor::new(env.clone(), chef(), BufferedSink::new());
    let operations = vec![Operation::install(Package::file("demo", "0.1.0", &archive))];
    assert_eq!(executor.execute(operations).await, 0);

    // The archive install goes through, but no metadata directory is ever requested.
    assert_eq!(env.calls().len(), 1);
    Ok(())
}

#[test]
fn virtualenv_is_an_environment() {
    // Compile-time check that the real environment satisfies the executor's trait object.
    fn accepts(_: Arc<dyn Environment>) {}
    accepts(Arc::new(Virtualenv::new("/tmp/venv")));
}
