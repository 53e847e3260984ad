//! Tests for repository management: listing, removal and modification.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use zypperpkg::connection::CommandResult;
use zypperpkg::modules::zypper::repos::{del_repo, get_repo, list_repos, mod_repo};
use zypperpkg::modules::ModuleParams;

const OSS: &str = "[repo-oss]
name=Main Repository
enabled=1
autorefresh=1
baseurl=http://download.opensuse.org/distribution/leap/15.5/repo/oss/
type=rpm-md
keeppackages=0
";

const UPDATE: &str = "[repo-update]
name=Main Update Repository
enabled=0
autorefresh=1
baseurl=http://download.opensuse.org/update/leap/15.5/oss
gpgkey=NONE
";

fn with_repos() -> (std::sync::Arc<MockConnection>, zypperpkg::modules::ModuleContext) {
    let (mock, ctx) = setup();
    mock.set_default_result(CommandResult::success(xml_stream(""), String::new()));
    mock.add_virtual_file("/etc/zypp/repos.d/repo-oss.repo", OSS);
    mock.add_virtual_file("/etc/zypp/repos.d/repo-update.repo", UPDATE);
    mock.add_virtual_file("/etc/zypp/repos.d/README", "not a repo");
    (mock, ctx)
}

fn params(value: serde_json::Value) -> ModuleParams {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_list_repos() {
    let (_mock, ctx) = with_repos();
    let repos = list_repos(&ctx, None).await.unwrap();

    assert_eq!(repos.as_object().unwrap().len(), 2);
    assert_eq!(repos["repo-oss"]["alias"], json!("repo-oss"));
    assert_eq!(repos["repo-oss"]["enabled"], json!(true));
    assert_eq!(repos["repo-oss"]["keeppackages"], json!(false));
    assert_eq!(repos["repo-update"]["enabled"], json!(false));
    assert_eq!(repos["repo-update"]["gpgkey"], json!(null));
}

#[tokio::test]
async fn test_list_repos_under_root() {
    let (mock, ctx) = setup();
    mock.add_virtual_file("/mnt/etc/zypp/repos.d/repo-oss.repo", OSS);

    let repos = list_repos(&ctx, Some("/mnt")).await.unwrap();
    assert!(repos.get("repo-oss").is_some());
    assert_eq!(list_repos(&ctx, None).await.unwrap(), json!({}));
}

#[tokio::test]
async fn test_get_repo_missing() {
    let (_mock, ctx) = with_repos();
    assert!(get_repo(&ctx, "nope", None).await.unwrap().is_empty());
    assert_eq!(
        get_repo(&ctx, "repo-oss", None).await.unwrap()["name"],
        json!("Main Repository")
    );
}

#[tokio::test]
async fn test_del_repo() {
    let (mock, ctx) = with_repos();
    mock.on_stdout(
        "zypper --non-interactive --xmlout --no-refresh rr --loose-auth --loose-query repo-oss",
        xml_stream(
            "<progress id=\"\" name=\"Removing repository 'Main Repository'\"/>\n\
             <message type=\"info\">Repository 'Main Repository' has been removed.</message>",
        ),
    );

    let ret = del_repo(&ctx, "repo-oss", None).await.unwrap();
    assert_eq!(
        ret,
        json!({
            "repo-oss": true,
            "message": "Repository 'Main Repository' has been removed."
        })
    );

    let err = del_repo(&ctx, "nope", None).await.unwrap_err();
    assert_eq!(err.to_string(), "Repository 'nope' not found.");
}

#[tokio::test]
async fn test_mod_repo_requires_url_for_new_repo() {
    let (_mock, ctx) = with_repos();
    let err = mod_repo(&ctx, "new", &params(json!({"enabled": true})))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Repository 'new' not found, and neither 'baseurl' nor 'mirrorlist' was specified"
    );

    let err = mod_repo(&ctx, "new", &params(json!({"url": "not a url"})))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Repository 'new' not found and URL for baseurl/mirrorlist is malformed"
    );
}

#[tokio::test]
async fn test_mod_repo_rejects_duplicate_url() {
    let (_mock, ctx) = with_repos();
    let err = mod_repo(
        &ctx,
        "copy",
        &params(json!({"url": "http://download.opensuse.org/update/leap/15.5/oss"})),
    )
    .await
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Repository 'copy' already exists as 'repo-update'."
    );
}

#[tokio::test]
async fn test_mod_repo_updates_flags() {
    let (mock, ctx) = with_repos();
    let ret = mod_repo(
        &ctx,
        "repo-update",
        &params(json!({"enabled": true, "priority": 90, "gpgautoimport": true})),
    )
    .await
    .unwrap();

    assert_eq!(ret["alias"], json!("repo-update"));
    assert!(ret.get("comment").is_none());
    assert_eq!(
        mock.commands_starting_with("zypper"),
        vec![
            "zypper --non-interactive --xmlout --gpg-auto-import-keys mr --enable --priority=90 repo-update"
                .to_string(),
            "zypper --non-interactive --xmlout --gpg-auto-import-keys refresh repo-update"
                .to_string(),
        ]
    );
}

#[tokio::test]
async fn test_mod_repo_without_changes() {
    let (mock, ctx) = with_repos();
    let ret = mod_repo(&ctx, "repo-oss", &ModuleParams::new()).await.unwrap();
    assert_eq!(
        ret["comment"],
        json!("Specified arguments did not result in modification of repo")
    );
    assert!(mock.commands_starting_with("zypper").is_empty());
}

#[tokio::test]
async fn test_mod_repo_adds_repository() {
    let (mock, ctx) = setup();
    mock.set_default_result(CommandResult::success(xml_stream(""), String::new()));
    mock.add_virtual_dir("/etc/zypp/repos.d");
    let url = "http://download.opensuse.org/repositories/devel:/tools/15.5/";

    // The mock filesystem does not change after `zypper ar`
    let ret = mod_repo(&ctx, "devel", &params(json!({"url": url}))).await;
    assert_eq!(
        ret.unwrap_err().to_string(),
        "Failed add new repository 'devel' for unspecified reason. Please check zypper logs."
    );
    assert_eq!(
        mock.commands_starting_with("zypper"),
        vec![format!(
            "zypper --non-interactive --xmlout --no-refresh ar {} devel",
            url
        )]
    );
}

#[tokio::test]
async fn test_mod_repo_baseurl_change_readds_repository() {
    let (mock, ctx) = with_repos();
    let file = "/etc/zypp/repos.d/repo-oss.repo";
    let url = "http://mirror.example.org/leap/15.5/repo/oss/";
    let rr = "zypper --non-interactive --xmlout --no-refresh rr --loose-auth --loose-query repo-oss";
    let ar = format!("zypper --non-interactive --xmlout --no-refresh ar {} repo-oss", url);

    mock.on_stdout(
        rr,
        xml_stream("<message type=\"info\">Repository 'Main Repository' has been removed.</message>"),
    );
    mock.on_file_change(rr, file, None);
    mock.on_file_change(
        ar.clone(),
        file,
        Some(&format!(
            "[repo-oss]\nname=Main Repository\nenabled=1\nautorefresh=1\nbaseurl={}\nkeeppackages=0\n",
            url
        )),
    );

    let ret = mod_repo(&ctx, "repo-oss", &params(json!({"baseurl": url})))
        .await
        .unwrap();
    assert_eq!(ret["baseurl"], json!(url));
    assert!(ret.get("comment").is_none());
    assert_eq!(
        mock.commands_starting_with("zypper"),
        vec![
            rr.to_string(),
            ar,
            "zypper --non-interactive --xmlout mr --enable --no-keep-packages --name Main Repository repo-oss"
                .to_string(),
        ]
    );
}

#[tokio::test]
async fn test_mod_repo_baseurl_change_keeps_explicit_cache() {
    let (mock, ctx) = with_repos();
    let file = "/etc/zypp/repos.d/repo-update.repo";
    let url = "http://mirror.example.org/update/leap/15.5/oss/";
    let rr = "zypper --non-interactive --xmlout --no-refresh rr --loose-auth --loose-query repo-update";

    mock.on_stdout(
        rr,
        xml_stream("<message type=\"info\">Repository 'Main Update Repository' has been removed.</message>"),
    );
    mock.on_file_change(rr, file, None);
    mock.on_file_change(
        format!("zypper --non-interactive --xmlout --no-refresh ar {} repo-update", url),
        file,
        Some(&format!("[repo-update]\nname=Main Update Repository\nenabled=0\nbaseurl={}\n", url)),
    );

    mod_repo(
        &ctx,
        "repo-update",
        &params(json!({"baseurl": url, "cache": true})),
    )
    .await
    .unwrap();
    assert_eq!(
        mock.commands_starting_with("zypper --non-interactive --xmlout mr"),
        vec![
            "zypper --non-interactive --xmlout mr --disable --keep-packages --name Main Update Repository repo-update"
                .to_string()
        ]
    );
}
