//! Token-based WHERE clause builder.

use std::fmt;

/// A value usable as a WHERE condition.
///
/// `None`, empty and whitespace-only conditions are skipped by the builder.
pub trait IntoCondition {
    fn into_condition(self) -> Option<String>;
}

impl IntoCondition for &str {
    fn into_condition(self) -> Option<String> {
        Some(self.to_string())
    }
}

impl IntoCondition for String {
    fn into_condition(self) -> Option<String> {
        Some(self)
    }
}

impl IntoCondition for &String {
    fn into_condition(self) -> Option<String> {
        Some(self.clone())
    }
}

impl<T: IntoCondition> IntoCondition for Option<T> {
    fn into_condition(self) -> Option<String> {
        self.and_then(IntoCondition::into_condition)
    }
}

fn non_blank(condition: impl IntoCondition) -> Option<String> {
    condition.into_condition().filter(|c| !c.trim().is_empty())
}

fn connector(use_or: bool) -> &'static str {
    if use_or { "OR" } else { "AND" }
}

fn all_true(flags: Option<&[bool]>) -> bool {
    flags.is_some_and(|flags| flags.iter().all(|&f| f))
}

/// Generates the `*_if` (single flag) and `*_if_all` (every flag set, `None`
/// skips) forms of a combinator.
macro_rules! conditional {
    (cond: $base:ident, $if_name:ident, $all_name:ident) => {
        #[doc = concat!("[`WhereBuilder::", stringify!($base), "`] when `enabled` is true.")]
        pub fn $if_name(&mut self, enabled: bool, condition: impl IntoCondition) -> &mut Self {
            if enabled {
                self.$base(condition);
            }
            self
        }

        #[doc = concat!("[`WhereBuilder::", stringify!($base), "`] when every flag is true.")]
        pub fn $all_name(
            &mut self,
            flags: Option<&[bool]>,
            condition: impl IntoCondition,
        ) -> &mut Self {
            if all_true(flags) {
                self.$base(condition);
            }
            self
        }
    };
    (group: $base:ident, $if_name:ident, $all_name:ident) => {
        #[doc = concat!("[`WhereBuilder::", stringify!($base), "`] when `enabled` is true.")]
        pub fn $if_name<I>(&mut self, enabled: bool, conditions: I) -> &mut Self
        where
            I: IntoIterator,
            I::Item: IntoCondition,
        {
            if enabled {
                self.$base(conditions);
            }
            self
        }

        #[doc = concat!("[`WhereBuilder::", stringify!($base), "`] when every flag is true.")]
        pub fn $all_name<I>(&mut self, flags: Option<&[bool]>, conditions: I) -> &mut Self
        where
            I: IntoIterator,
            I::Item: IntoCondition,
        {
            if all_true(flags) {
                self.$base(conditions);
            }
            self
        }
    };
    (nested: $base:ident, $if_name:ident, $all_name:ident) => {
        #[doc = concat!("[`WhereBuilder::", stringify!($base), "`] when `enabled` is true.")]
        pub fn $if_name<F>(&mut self, enabled: bool, configure: F) -> &mut Self
        where
            F: FnOnce(&mut WhereBuilder),
        {
            if enabled {
                self.$base(configure);
            }
            self
        }

        #[doc = concat!("[`WhereBuilder::", stringify!($base), "`] when every flag is true.")]
        pub fn $all_name<F>(&mut self, flags: Option<&[bool]>, configure: F) -> &mut Self
        where
            F: FnOnce(&mut WhereBuilder),
        {
            if all_true(flags) {
                self.$base(configure);
            }
            self
        }
    };
}

/// Builds a `WHERE` clause from conditions and parenthesized groups.
///
/// Each accepted condition becomes one token. The first token is the
/// condition itself; later tokens carry their leading `AND`/`OR`. The
/// connector of the very first token is dropped, so a clause may start with
/// `or(..)`.
///
/// # Example
///
/// ```ignore
/// use pgmat::WhereBuilder;
///
/// let sql = WhereBuilder::new()
///     .where_("deleted_at IS NULL")
///     .and_or_group(["role = 'admin'", "role = 'owner'"])
///     .and_if(only_active, "status = @status")
///     .build();
///
/// assert_eq!(
///     sql,
///     "WHERE deleted_at IS NULL AND (role = 'admin' OR role = 'owner') AND status = @status"
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhereBuilder {
    tokens: Vec<String>,
}

impl WhereBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tokens in insertion order.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    fn push_token(&mut self, body: String, negate: bool, use_or: bool) {
        let not = if negate { "NOT " } else { "" };
        let token = if self.tokens.is_empty() {
            format!("{not}{body}")
        } else {
            format!("{} {not}{body}", connector(use_or))
        };
        self.tokens.push(token);
    }

    /// Append one condition, optionally negated, joined with `OR` instead of
    /// `AND`. Blank conditions are ignored.
    pub fn add(&mut self, condition: impl IntoCondition, negate: bool, use_or: bool) -> &mut Self {
        if let Some(condition) = non_blank(condition) {
            self.push_token(condition, negate, use_or);
        }
        self
    }

    /// Append a parenthesized group.
    ///
    /// Survivors of the blank filter are joined with `OR` when `inner_or` is
    /// set, `AND` otherwise; the group is then attached like a single
    /// condition using `negate` and `use_or`. A group with no survivors adds
    /// nothing.
    pub fn add_group<I>(
        &mut self,
        negate: bool,
        use_or: bool,
        inner_or: bool,
        conditions: I,
    ) -> &mut Self
    where
        I: IntoIterator,
        I::Item: IntoCondition,
    {
        let parts: Vec<String> = conditions.into_iter().filter_map(non_blank).collect();
        if parts.is_empty() {
            return self;
        }
        let inner = parts.join(&format!(" {} ", connector(inner_or)));
        self.push_token(format!("({inner})"), negate, use_or);
        self
    }

    /// Append a group built by `configure` on a fresh builder.
    pub fn add_group_with<F>(&mut self, negate: bool, use_or: bool, configure: F) -> &mut Self
    where
        F: FnOnce(&mut WhereBuilder),
    {
        let mut child = WhereBuilder::new();
        configure(&mut child);
        let inner = child.build_internal();
        if !inner.is_empty() {
            self.push_token(format!("({inner})"), negate, use_or);
        }
        self
    }

    // ── single conditions ───────────────────────────────────────────────

    /// Start the clause. Same as [`WhereBuilder::and`].
    pub fn where_(&mut self, condition: impl IntoCondition) -> &mut Self {
        self.add(condition, false, false)
    }

    pub fn and(&mut self, condition: impl IntoCondition) -> &mut Self {
        self.add(condition, false, false)
    }

    pub fn and_not(&mut self, condition: impl IntoCondition) -> &mut Self {
        self.add(condition, true, false)
    }

    pub fn or(&mut self, condition: impl IntoCondition) -> &mut Self {
        self.add(condition, false, true)
    }

    pub fn or_not(&mut self, condition: impl IntoCondition) -> &mut Self {
        self.add(condition, true, true)
    }

    conditional!(cond: where_, where_if, where_if_all);
    conditional!(cond: and, and_if, and_if_all);
    conditional!(cond: and_not, and_not_if, and_not_if_all);
    conditional!(cond: or, or_if, or_if_all);
    conditional!(cond: or_not, or_not_if, or_not_if_all);

    // ── groups ──────────────────────────────────────────────────────────

    /// `AND (a OR b ...)`
    pub fn and_or_group<I>(&mut self, conditions: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: IntoCondition,
    {
        self.add_group(false, false, true, conditions)
    }

    /// `AND NOT (a OR b ...)`
    pub fn and_or_not_group<I>(&mut self, conditions: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: IntoCondition,
    {
        self.add_group(true, false, true, conditions)
    }

    /// `OR (a AND b ...)`
    pub fn or_and_group<I>(&mut self, conditions: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: IntoCondition,
    {
        self.add_group(false, true, false, conditions)
    }

    /// `OR NOT (a AND b ...)`
    pub fn or_and_not_group<I>(&mut self, conditions: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: IntoCondition,
    {
        self.add_group(true, true, false, conditions)
    }

    conditional!(group: and_or_group, and_or_group_if, and_or_group_if_all);
    conditional!(group: and_or_not_group, and_or_not_group_if, and_or_not_group_if_all);
    conditional!(group: or_and_group, or_and_group_if, or_and_group_if_all);
    conditional!(group: or_and_not_group, or_and_not_group_if, or_and_not_group_if_all);

    // ── nested builders ─────────────────────────────────────────────────

    pub fn and_group<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut WhereBuilder),
    {
        self.add_group_with(false, false, configure)
    }

    pub fn and_not_group<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut WhereBuilder),
    {
        self.add_group_with(true, false, configure)
    }

    pub fn or_group<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut WhereBuilder),
    {
        self.add_group_with(false, true, configure)
    }

    pub fn or_not_group<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut WhereBuilder),
    {
        self.add_group_with(true, true, configure)
    }

    conditional!(nested: and_group, and_group_if, and_group_if_all);
    conditional!(nested: and_not_group, and_not_group_if, and_not_group_if_all);
    conditional!(nested: or_group, or_group_if, or_group_if_all);
    conditional!(nested: or_not_group, or_not_group_if, or_not_group_if_all);

    // ── output ──────────────────────────────────────────────────────────

    pub fn clear(&mut self) -> &mut Self {
        self.tokens.clear();
        self
    }

    /// Tokens joined with single spaces, without the `WHERE` keyword.
    pub fn build_internal(&self) -> String {
        self.tokens.join(" ")
    }

    /// `WHERE ...`, or an empty string when nothing was added.
    pub fn build(&self) -> String {
        if self.tokens.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.build_internal())
        }
    }
}

impl fmt::Display for WhereBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}
