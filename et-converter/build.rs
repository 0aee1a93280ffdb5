use grev::git_revision_auto;

fn main() {
    // Source tarballs carry no git metadata.
    let revision = match git_revision_auto(".") {
        Ok(Some(revision)) => revision,
        Ok(None) | Err(_) => "unknown".to_string(),
    };
    println!("cargo:rustc-env=GIT_REVISION={revision}");
}
