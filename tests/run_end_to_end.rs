use std::fs;
use std::path::{Path, PathBuf};

use git2::{Repository, Signature};
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;

use rvault::sync::Stage;
use rvault::{Config, Paths, run, watermark};

fn seed_repo(dir: &Path, file: &str, contents: &str) {
    fs::create_dir_all(dir).unwrap();
    let repo = Repository::init(dir).unwrap();
    fs::write(dir.join(file), contents).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(file)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("t", "t@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
        .unwrap();
}

struct Fixture {
    td: TempDir,
    server: MockServer,
}

impl Fixture {
    fn new() -> Self {
        Self {
            td: TempDir::new().unwrap(),
            server: MockServer::start(),
        }
    }

    fn sources(&self) -> PathBuf {
        self.td.path().join("sources")
    }

    fn paths(&self) -> Paths {
        Paths {
            config: self.td.path().join("config.toml"),
            state: self.td.path().join("state").join("watermark.json"),
            work: self.td.path().join("work"),
        }
    }

    fn config(&self) -> Config {
        let txt = format!(
            r#"
            owners = ["acme"]
            upload_concurrency = 2
            chunk_retry_delay_ms = 1
            chunk_retry_max_delay_ms = 10

            [github]
            username = "octocat"
            token = "gh-token"
            api_url = "{gh}"
            clone_url = "file://{src}"

            [graph]
            tenant_id = "t"
            client_id = "c"
            client_secret = "s"
            site_id = "s1"
            folder = "backup"
            api_url = "{graph}"
            login_url = "{login}"
            "#,
            gh = self.server.url("/gh"),
            src = self.sources().display(),
            graph = self.server.url("/graph"),
            login = self.server.url("/login"),
        );
        Config::from_toml(&txt).unwrap()
    }

    fn list_repos(&self, names: &[&str]) {
        let items: Vec<_> = names.iter().map(|n| json!({ "full_name": n })).collect();
        self.server.mock(|when, then| {
            when.method(GET).path("/gh/user/repos").query_param("page", "1");
            then.status(200).json_body(json!(items));
        });
        self.server.mock(|when, then| {
            when.method(GET).path("/gh/user/repos").query_param("page", "2");
            then.status(200).json_body(json!([]));
        });
    }

    fn commit_time(&self, full_name: &str, date: &str) -> httpmock::Mock<'_> {
        let path = format!("/gh/repos/{}/commits", full_name);
        self.server.mock(|when, then| {
            when.method(GET).path(path);
            then.status(200)
                .json_body(json!([{ "commit": { "author": { "date": date } } }]));
        })
    }

    fn token(&self) {
        self.server.mock(|when, then| {
            when.method(POST).path("/login/t/oauth2/v2.0/token");
            then.status(200)
                .json_body(json!({ "access_token": "g-token", "expires_in": 3600 }));
        });
    }

    fn session(&self, full_name: &str) -> httpmock::Mock<'_> {
        let path = format!(
            "/graph/sites/s1/root:/backup/{}.tar.gz:/createUploadSession",
            full_name
        );
        let upload_url = self.server.url(format!("/up/{}", full_name));
        self.server.mock(|when, then| {
            when.method(POST)
                .path(path)
                .header("Authorization", "Bearer g-token");
            then.status(200).json_body(json!({
                "uploadUrl": upload_url,
                "expirationDateTime": "2030-01-01T00:00:00Z",
                "nextExpectedRanges": ["0-"]
            }));
        })
    }

    fn put(&self, full_name: &str, status: u16) -> httpmock::Mock<'_> {
        let path = format!("/up/{}", full_name);
        self.server.mock(|when, then| {
            when.method(PUT).path(path).header_exists("Content-Range");
            then.status(status).json_body(json!({ "id": "item" }));
        })
    }

    fn seed_watermark(&self, entries: &[(&str, &str)]) {
        let wm: watermark::Watermark = entries
            .iter()
            .map(|(r, t)| (r.to_string(), t.parse().unwrap()))
            .collect();
        watermark::save(&self.paths().state, &wm).unwrap();
    }

    fn leftover_archives(&self) -> usize {
        walk_files(&self.paths().archives())
    }
}

fn walk_files(dir: &Path) -> usize {
    let Ok(rd) = fs::read_dir(dir) else {
        return 0;
    };
    rd.flatten()
        .map(|e| {
            let p = e.path();
            if p.is_dir() { walk_files(&p) } else { 1 }
        })
        .sum()
}

#[test]
fn only_repository_changed_after_watermark_is_backed_up() {
    let fx = Fixture::new();
    seed_repo(&fx.sources().join("acme/new.git"), "README.md", "new work");
    seed_repo(&fx.sources().join("acme/old.git"), "README.md", "old work");
    fx.seed_watermark(&[
        ("acme/new", "2024-01-01T00:00:00Z"),
        ("acme/old", "2024-01-01T00:00:00Z"),
    ]);

    fx.list_repos(&["acme/new", "acme/old", "other/x"]);
    fx.commit_time("acme/new", "2024-06-01T00:00:00Z");
    fx.commit_time("acme/old", "2023-12-01T00:00:00Z");
    let other = fx.commit_time("other/x", "2025-01-01T00:00:00Z");
    fx.token();
    let new_session = fx.session("acme/new");
    let old_session = fx.session("acme/old");
    let new_put = fx.put("acme/new", 201);

    let report = run(&fx.config(), &fx.paths(), true).unwrap();

    assert!(!report.has_failures(), "{}", report.render());
    assert_eq!(report.considered, 2);
    assert_eq!(report.changed, 1);
    assert_eq!(report.uploaded, vec!["acme/new".to_string()]);
    assert_eq!(report.archived.len(), 1);
    assert_eq!(report.archived[0].repo, "acme/new");

    new_session.assert();
    new_put.assert();
    old_session.assert_hits(0);
    other.assert_hits(0);

    let wm = watermark::load(&fx.paths().state).unwrap();
    assert_eq!(wm["acme/new"].to_rfc3339(), "2024-06-01T00:00:00+00:00");
    assert_eq!(wm["acme/old"].to_rfc3339(), "2024-01-01T00:00:00+00:00");

    assert_eq!(fx.leftover_archives(), 0);
    assert_eq!(fs::read_dir(fx.paths().clones()).unwrap().count(), 0);
}

#[test]
fn repository_missing_from_watermark_is_backed_up() {
    let fx = Fixture::new();
    seed_repo(&fx.sources().join("acme/fresh.git"), "main.rs", "fn main() {}");

    fx.list_repos(&["acme/fresh"]);
    fx.commit_time("acme/fresh", "2020-01-01T00:00:00Z");
    fx.token();
    fx.session("acme/fresh");
    let put = fx.put("acme/fresh", 200);

    let report = run(&fx.config(), &fx.paths(), true).unwrap();
    assert!(!report.has_failures(), "{}", report.render());
    put.assert();
    let wm = watermark::load(&fx.paths().state).unwrap();
    assert!(wm.contains_key("acme/fresh"));
}

#[test]
fn clone_failure_is_isolated_and_not_watermarked() {
    let fx = Fixture::new();
    seed_repo(&fx.sources().join("acme/good.git"), "a.txt", "a");
    // acme/gone has no source: its clone fails

    fx.list_repos(&["acme/good", "acme/gone"]);
    fx.commit_time("acme/good", "2024-06-01T00:00:00Z");
    fx.commit_time("acme/gone", "2024-06-01T00:00:00Z");
    fx.token();
    fx.session("acme/good");
    let gone_session = fx.session("acme/gone");
    let good_put = fx.put("acme/good", 201);

    let report = run(&fx.config(), &fx.paths(), true).unwrap();

    assert_eq!(report.uploaded, vec!["acme/good".to_string()]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].subject, "acme/gone");
    assert_eq!(report.failures[0].stage, Stage::Clone);
    good_put.assert();
    gone_session.assert_hits(0);

    let wm = watermark::load(&fx.paths().state).unwrap();
    assert!(wm.contains_key("acme/good"));
    assert!(!wm.contains_key("acme/gone"));
    assert_eq!(fs::read_dir(fx.paths().clones()).unwrap().count(), 0);
}

#[test]
fn failed_upload_still_removes_archive() {
    let fx = Fixture::new();
    seed_repo(&fx.sources().join("acme/flaky.git"), "a.txt", "a");

    fx.list_repos(&["acme/flaky"]);
    fx.commit_time("acme/flaky", "2024-06-01T00:00:00Z");
    fx.token();
    fx.session("acme/flaky");
    let put = fx.put("acme/flaky", 500);
    fx.server.mock(|when, then| {
        when.method(DELETE).path("/up/acme/flaky");
        then.status(204);
    });

    // progress enabled: failure logging has to go around the bars
    let report = run(&fx.config(), &fx.paths(), false).unwrap();

    assert!(report.uploaded.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, Stage::Upload);
    // default chunk_retries = 2
    put.assert_hits(3);
    assert_eq!(fx.leftover_archives(), 0);
    // the watermark is written before uploads start
    let wm = watermark::load(&fx.paths().state).unwrap();
    assert!(wm.contains_key("acme/flaky"));
}

#[test]
fn unwritable_watermark_is_reported_and_uploads_still_run() {
    let fx = Fixture::new();
    seed_repo(&fx.sources().join("acme/kept.git"), "a.txt", "a");

    fx.list_repos(&["acme/kept"]);
    fx.commit_time("acme/kept", "2024-06-01T00:00:00Z");
    fx.token();
    fx.session("acme/kept");
    let put = fx.put("acme/kept", 201);

    // the state file's parent is a regular file, so the save cannot succeed
    let blocker = fx.td.path().join("blocker");
    fs::write(&blocker, "not a directory").unwrap();
    let mut paths = fx.paths();
    paths.state = blocker.join("watermark.json");

    let report = run(&fx.config(), &paths, true).unwrap();

    put.assert();
    assert_eq!(report.uploaded, vec!["acme/kept".to_string()]);
    assert_eq!(report.archived.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, Stage::Watermark);
    assert_eq!(report.failures[0].subject, paths.state.display().to_string());
    assert!(report.has_failures());
}

#[test]
fn listing_failure_aborts_without_touching_watermark() {
    let fx = Fixture::new();
    fx.seed_watermark(&[("acme/a", "2024-01-01T00:00:00Z")]);
    let before = fs::read_to_string(&fx.paths().state).unwrap();
    fx.server.mock(|when, then| {
        when.method(GET).path("/gh/user/repos");
        then.status(500);
    });

    let err = run(&fx.config(), &fx.paths(), true).unwrap_err();
    assert!(format!("{:#}", err).contains("listing repositories"));
    assert_eq!(fs::read_to_string(&fx.paths().state).unwrap(), before);
}

#[test]
fn nothing_changed_means_no_work() {
    let fx = Fixture::new();
    fx.seed_watermark(&[("acme/a", "2024-01-01T00:00:00Z")]);
    fx.list_repos(&["acme/a"]);
    fx.commit_time("acme/a", "2024-01-01T00:00:00Z");
    let token = fx.server.mock(|when, then| {
        when.method(POST).path("/login/t/oauth2/v2.0/token");
        then.status(200);
    });

    let report = run(&fx.config(), &fx.paths(), true).unwrap();
    assert_eq!(report.changed, 0);
    assert!(report.archived.is_empty());
    token.assert_hits(0);
}
