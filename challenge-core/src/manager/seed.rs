//! Fixed files committed into every new challenge repository.

pub const CHALLENGE_FILE: &str = "CHALLENGE.md";
pub const WORKFLOW_FILE: &str = ".github/workflows/challenge-ci.yml";
pub const DEFAULT_PROBLEM_FILE: &str = "problem.md";

pub fn challenge_markdown(title: &str, description: &str) -> String {
    format!(
        "# {title}\n\
         \n\
         {description}\n\
         \n\
         ## Submission\n\
         Open a pull request against a `version/v<N>` branch.\n\
         Once every check passes it is merged automatically.\n\
         \n\
         ## Versions\n\
         Each automatic merge is tagged `v1`, `v2`, ... in order.\n\
         To fetch a specific version:\n\
         - `git fetch --tags`\n\
         - `git checkout v1`\n"
    )
}

pub fn ci_workflow(default_branch: &str) -> String {
    format!(
        "name: challenge-ci\n\
         \n\
         on:\n  \
           pull_request:\n    \
             branches:\n      \
               - {default_branch}\n      \
               - 'version/v*'\n\
         \n\
         jobs:\n  \
           validate:\n    \
             runs-on: ubuntu-latest\n    \
             steps:\n      \
               - uses: actions/checkout@v4\n      \
               - run: echo \"challenge ci ok\"\n"
    )
}

/// File name only; directories are dropped and Windows separators normalised.
/// URL delimiters and control characters become `-`.
pub fn problem_file_name(raw: &str) -> String {
    let normalised = raw.trim().replace('\\', "/");
    match normalised.rsplit('/').next().map(str::trim) {
        Some(name) if !name.is_empty() && name != "." && name != ".." => name
            .chars()
            .map(|c| match c {
                '?' | '#' | '%' => '-',
                c if c.is_control() => '-',
                c => c,
            })
            .collect(),
        _ => DEFAULT_PROBLEM_FILE.to_string(),
    }
}
