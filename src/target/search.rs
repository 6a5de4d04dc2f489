/// Magento `searchCriteria` query builder.
///
/// Each call to [`SearchCriteria::filter`] opens a new filter group; groups
/// are ANDed together, matching how the REST layer evaluates them.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCriteria {
    groups: Vec<(String, String, String)>,
    page_size: u32,
    current_page: u32,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            page_size: 1000,
            current_page: 1,
        }
    }
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: &str, value: impl ToString, condition: &str) -> Self {
        self.groups
            .push((field.to_string(), value.to_string(), condition.to_string()));
        self
    }

    pub fn eq(self, field: &str, value: impl ToString) -> Self {
        self.filter(field, value, "eq")
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Flattened query pairs; the client url-encodes them.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.groups.len() * 3 + 2);
        for (i, (field, value, condition)) in self.groups.iter().enumerate() {
            let prefix = format!("searchCriteria[filterGroups][{i}][filters][0]");
            out.push((format!("{prefix}[field]"), field.clone()));
            out.push((format!("{prefix}[value]"), value.clone()));
            out.push((format!("{prefix}[conditionType]"), condition.clone()));
        }
        out.push(("searchCriteria[pageSize]".into(), self.page_size.to_string()));
        out.push((
            "searchCriteria[currentPage]".into(),
            self.current_page.to_string(),
        ));
        out
    }

    /// Encoded query string, handy for logs.
    pub fn to_query_string(&self) -> String {
        self.to_query()
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_filter_is_its_own_group() {
        let q = SearchCriteria::new()
            .eq("attribute_set_id", 10)
            .eq("attribute_group_name", "Product Details")
            .to_query();
        assert_eq!(
            q[0],
            (
                "searchCriteria[filterGroups][0][filters][0][field]".to_string(),
                "attribute_set_id".to_string()
            )
        );
        assert_eq!(q[1].1, "10");
        assert_eq!(
            q[3].0,
            "searchCriteria[filterGroups][1][filters][0][field]"
        );
        assert_eq!(q[4].1, "Product Details");
        assert_eq!(q[5].1, "eq");
        assert_eq!(q[6], ("searchCriteria[pageSize]".into(), "1000".into()));
        assert_eq!(q[7], ("searchCriteria[currentPage]".into(), "1".into()));
    }

    #[test]
    fn query_string_is_encoded() {
        let s = SearchCriteria::new().eq("name", "A & B").page_size(5).to_query_string();
        assert!(s.starts_with("searchCriteria%5BfilterGroups%5D%5B0%5D"), "{s}");
        assert!(s.contains("=A%20%26%20B"), "{s}");
        assert!(s.ends_with("searchCriteria%5BcurrentPage%5D=1"), "{s}");
    }
}
