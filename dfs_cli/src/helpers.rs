use anyhow::{Context, Result, anyhow};
use dfs_core::{Node, NodeType, Reference, RequestContext, SpaceId, User};

/// Parses `SPACE:/PATH`; a bare `SPACE` addresses the space root.
pub fn parse_reference(s: &str) -> Result<Reference> {
    let (space, path) = match s.split_once(':') {
        Some((space, path)) => (space, path),
        None => (s, "/"),
    };
    let space_id =
        SpaceId::new(space).with_context(|| format!("invalid space id in '{s}'"))?;
    let path = if path.is_empty() { "/" } else { path };
    if !path.starts_with('/') {
        return Err(anyhow!("path in '{s}' must start with '/'"));
    }
    Ok(Reference::path(space_id, path))
}

pub fn parse_space(s: &str) -> Result<SpaceId> {
    SpaceId::new(s).with_context(|| format!("invalid space id '{s}'"))
}

pub fn context_for(user: &str) -> RequestContext {
    RequestContext::for_user(User::new(user))
}

pub fn format_node(node: &Node) -> String {
    let kind = match node.node_type {
        NodeType::Container => "d",
        NodeType::File => "-",
    };
    format!(
        "{kind} {:>12} {} {}",
        node.blob_size,
        node.mtime.to_datetime().format("%Y-%m-%d %H:%M:%S"),
        node.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_parse() {
        let r = parse_reference("docs:/a/b.txt").unwrap();
        assert_eq!(r.space_id.as_str(), "docs");
        assert_eq!(r.path, "/a/b.txt");

        assert_eq!(parse_reference("docs").unwrap().path, "/");
        assert_eq!(parse_reference("docs:").unwrap().path, "/");
        assert!(parse_reference("docs:a").is_err());
        assert!(parse_reference("bad space:/x").is_err());
    }
}
