use crate::error;

pub type Result<T> = ::std::result::Result<T, error::Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

#[macro_export]
macro_rules! res {
    ($err:expr) => {
        Err(From::from($err))
    };
}

/// Canonicalize a rooted slash-separated path textually.
///
/// Resolves `.` and `..` components and collapses repeated slashes without
/// consulting the filesystem. `..` never climbs above the root, so a
/// cleaned path cannot escape the tree it is joined under.
pub fn path_clean(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            comp => parts.push(comp),
        }
    }
    let mut cleaned = String::from("/");
    cleaned.push_str(&parts.join("/"));
    cleaned
}

/// Join a walk component onto a rooted path and canonicalize the result.
pub fn path_join(base: &str, name: &str) -> String {
    path_clean(&format!("{}/{}", base, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_resolves_dots_and_slashes() {
        assert_eq!(path_clean("/"), "/");
        assert_eq!(path_clean("/a/b"), "/a/b");
        assert_eq!(path_clean("/a//b/"), "/a/b");
        assert_eq!(path_clean("/a/./b"), "/a/b");
        assert_eq!(path_clean("/a/b/.."), "/a");
        assert_eq!(path_clean("/a/../b"), "/b");
    }

    #[test]
    fn clean_never_escapes_the_root() {
        assert_eq!(path_clean("/.."), "/");
        assert_eq!(path_clean("/../.."), "/");
        assert_eq!(path_clean("/../etc/passwd"), "/etc/passwd");
        assert_eq!(path_clean("/a/../../.."), "/");
    }

    #[test]
    fn join_walk_components() {
        assert_eq!(path_join("/", "a"), "/a");
        assert_eq!(path_join("/a", "b.txt"), "/a/b.txt");
        assert_eq!(path_join("/a", ".."), "/");
        assert_eq!(path_join("/", ".."), "/");
        assert_eq!(path_join("/a/b", "."), "/a/b");
    }
}
