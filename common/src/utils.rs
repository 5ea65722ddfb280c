use serde::{Deserialize, Serialize};

/// Kind of write carried by a change notification. Spelled the way Postgres
/// reports `TG_OP`.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    INSERT,
    UPDATE,
    DELETE,
}

impl_from_str_for_enum!(ChangeKind, INSERT, UPDATE, DELETE);
impl_display_for_enum!(ChangeKind, INSERT, UPDATE, DELETE);

/// Case-insensitive substring match of `query` against any of `fields`.
/// An empty query matches everything.
pub fn matches_search<'a>(query: &str, fields: impl IntoIterator<Item = &'a str>) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    fields
        .into_iter()
        .any(|field| field.to_lowercase().contains(&query))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_ignores_case_and_blank_queries() {
        assert!(matches_search("", ["anything"]));
        assert!(matches_search("  ", std::iter::empty()));
        assert!(matches_search("ALI", ["Muhammad Ali", "0300"]));
        assert!(matches_search("0300", ["Zara", "0300-1234567"]));
        assert!(!matches_search("faisal", ["Zara", "Gulberg"]));
    }

    #[test]
    fn change_kind_round_trips_through_text() {
        assert_eq!("delete".parse::<ChangeKind>().unwrap(), ChangeKind::DELETE);
        assert_eq!(ChangeKind::INSERT.to_string(), "INSERT");
    }
}
