use std::borrow::Cow;

/// Pluralizes a piece of text.
pub fn pluralize(base: &str, count: usize) -> Cow<'_, str> {
    if count == 1 {
        base.into()
    } else {
        format!("{base}s").into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pluralize_zero() {
        assert_eq!(pluralize("approval", 0), "approvals");
    }

    #[test]
    fn pluralize_one() {
        assert_eq!(pluralize("approval", 1), "approval");
    }

    #[test]
    fn pluralize_two() {
        assert_eq!(pluralize("approval", 2), "approvals");
    }
}
