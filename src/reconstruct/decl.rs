//! # Declaration rendering
//!
//! `ADD_LOCAL`/`ADD_GLOBAL` accumulate into a pending declaration group
//! until a non-declaration instruction is reached, at which point the
//! group is flushed as one `decl a, b, c;` line (spec §4.5.1, §4.5.5).

use crate::reconstruct::state::DeclGroup;

pub fn render_decl_line(group: &DeclGroup) -> String {
    format!("decl {};\n", group.names.join(", "))
}

pub fn render_decl_with_initializer(group: &DeclGroup, initializer_expr: &str) -> String {
    let mut names = group.names.clone();
    let last = names.pop().unwrap_or_default();
    if names.is_empty() {
        format!("decl {last} = {initializer_expr};\n")
    } else {
        format!("decl {}, {last} = {initializer_expr};\n", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_plain_decl_list() {
        let group = DeclGroup {
            names: vec!["a".into(), "b".into()],
            is_local: true,
        };
        assert_eq!(render_decl_line(&group), "decl a, b;\n");
    }

    #[test]
    fn renders_decl_with_trailing_initializer() {
        let group = DeclGroup {
            names: vec!["a".into(), "b".into()],
            is_local: true,
        };
        assert_eq!(render_decl_with_initializer(&group, "5"), "decl a, b = 5;\n");
    }
}
