//! # Function header rendering
//!
//! `BEGIN_FUNCT`/`ADD_ARG` accumulate a pending name and parameter list;
//! the header text is committed once the parameter list is known to be
//! complete (spec §4.4.6, §4.5.6).

pub fn render_header(name: &str, params: &[String]) -> String {
    format!("defun {}({})\n{{\n", name, params.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_header_with_params() {
        assert_eq!(render_header("f", &["x".into(), "y".into()]), "defun f(x, y)\n{\n");
    }

    #[test]
    fn renders_header_with_no_params() {
        assert_eq!(render_header("f", &[]), "defun f()\n{\n");
    }
}
