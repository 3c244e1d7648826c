//! Rule-driven flattening of nested columns into a flat attribute schema.
//!
//! Each column resolves to a [`ColumnKind`] once, and the kind decides how
//! many projections it expands to:
//!
//! 1. the geometry column is skipped (the query builder projects it last),
//! 2. nested columns named in the [`RuleTable`] expand through their rule
//!    when the rule accepts the column's [`TypeShape`],
//! 3. other structs follow the [`UnknownStructPolicy`],
//! 4. maps and lists become one JSON text attribute,
//! 5. scalars pass through.
//!
//! Output names are cut to the ten-byte attribute limit on a character
//! boundary and made unique (case-insensitively) by numeric suffixing.

use std::collections::{HashMap, HashSet};

use log::warn;

use crate::error::FlattenError;
use crate::options::{ExportOptions, UnknownStructPolicy};
use crate::types::{ColumnDescriptor, ProjectionExpression, TableSchema, TypeShape};
use crate::utils::{
    MAX_FIELD_NAME_LEN, quote_identifier, quote_literal, truncate_field_name, truncate_to_bytes,
};

/// How a rule field is encoded in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    /// The value itself, for scalar sub-fields
    Value,
    /// JSON text, for nested sub-fields
    Json,
}

/// One output attribute produced by a [`FlattenRule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
    /// Descriptive name, e.g. `names_primary`
    pub logical_name: String,
    /// Attribute name written to the file, e.g. `names_prim`
    pub output_name: String,
    /// Struct path below the column; empty selects the whole column
    pub path: Vec<String>,
    /// Output encoding
    pub encoding: FieldEncoding,
}

impl FieldRule {
    /// A scalar sub-field.
    #[must_use]
    pub fn value(logical_name: &str, output_name: &str, path: &[&str]) -> Self {
        Self::new(logical_name, output_name, path, FieldEncoding::Value)
    }

    /// A sub-field (or the whole column when `path` is empty) written as JSON.
    #[must_use]
    pub fn json(logical_name: &str, output_name: &str, path: &[&str]) -> Self {
        Self::new(logical_name, output_name, path, FieldEncoding::Json)
    }

    fn new(logical_name: &str, output_name: &str, path: &[&str], encoding: FieldEncoding) -> Self {
        Self {
            logical_name: logical_name.to_string(),
            output_name: output_name.to_string(),
            path: path.iter().map(|p| (*p).to_string()).collect(),
            encoding,
        }
    }

    fn expression(&self, column: &str) -> String {
        let accessor = self.path.iter().fold(quote_identifier(column), |expr, field| {
            format!("struct_extract({expr}, {})", quote_literal(field))
        });
        match self.encoding {
            FieldEncoding::Value => accessor,
            FieldEncoding::Json => json_text(&accessor),
        }
    }
}

/// Dedicated expansion for one known nested column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenRule {
    /// Short identifier of the nested shape, e.g. `bbox`
    pub tag: String,
    /// Output attributes, in output order
    pub fields: Vec<FieldRule>,
    /// Column shapes the rule applies to; other shapes fall back to the
    /// generic handling
    pub shapes: Vec<TypeShape>,
}

impl FlattenRule {
    /// Creates a rule that applies to struct columns.
    #[must_use]
    pub fn new(tag: impl Into<String>, fields: Vec<FieldRule>) -> Self {
        Self {
            tag: tag.into(),
            fields,
            shapes: vec![TypeShape::Struct],
        }
    }

    /// Replaces the accepted column shapes.
    #[must_use]
    pub fn with_shapes(mut self, shapes: &[TypeShape]) -> Self {
        self.shapes = shapes.to_vec();
        self
    }

    /// Returns `true` if the rule applies to a column of `shape`.
    #[must_use]
    pub fn accepts(&self, shape: TypeShape) -> bool {
        self.shapes.contains(&shape)
    }
}

/// Mapping from column name (case-sensitive) to its [`FlattenRule`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    rules: HashMap<String, FlattenRule>,
}

impl RuleTable {
    /// A table with no rules.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in rules for bounding boxes, names, categories, brand,
    /// sources and addresses.
    #[must_use]
    pub fn standard() -> Self {
        Self::empty()
            .with_rule(
                "bbox",
                FlattenRule::new(
                    "bbox",
                    vec![
                        FieldRule::value("bbox_xmin", "bbox_xmin", &["xmin"]),
                        FieldRule::value("bbox_xmax", "bbox_xmax", &["xmax"]),
                        FieldRule::value("bbox_ymin", "bbox_ymin", &["ymin"]),
                        FieldRule::value("bbox_ymax", "bbox_ymax", &["ymax"]),
                    ],
                ),
            )
            .with_rule(
                "sources",
                FlattenRule::new("sources", vec![FieldRule::json("sources", "sources", &[])])
                    .with_shapes(&[TypeShape::Struct, TypeShape::List]),
            )
            .with_rule(
                "names",
                FlattenRule::new(
                    "names",
                    vec![
                        FieldRule::value("names_primary", "names_prim", &["primary"]),
                        FieldRule::json("names_common", "names_comm", &["common"]),
                        FieldRule::json("names_rules", "names_rule", &["rules"]),
                    ],
                ),
            )
            .with_rule(
                "categories",
                FlattenRule::new(
                    "categories",
                    vec![
                        FieldRule::value("categories_primary", "cat_prim", &["primary"]),
                        FieldRule::json("categories_alternate", "cat_alt", &["alternate"]),
                    ],
                ),
            )
            .with_rule(
                "brand",
                FlattenRule::new(
                    "brand",
                    vec![
                        FieldRule::value("brand_wikidata", "brand_wiki", &["wikidata"]),
                        FieldRule::json("brand_names", "brand_name", &["names"]),
                    ],
                ),
            )
            .with_rule(
                "addresses",
                FlattenRule::new(
                    "addresses",
                    vec![FieldRule::json("addresses", "addresses", &[])],
                )
                .with_shapes(&[TypeShape::Struct, TypeShape::List]),
            )
    }

    /// Adds or replaces the rule for `column`.
    #[must_use]
    pub fn with_rule(mut self, column: impl Into<String>, rule: FlattenRule) -> Self {
        self.rules.insert(column.into(), rule);
        self
    }

    /// Rule for `column`, if any.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&FlattenRule> {
        self.rules.get(column)
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if the table has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// How a column is treated by the flattener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    /// The geometry column, projected separately
    Geometry,
    /// Non-nested value, passed through
    Scalar,
    /// Nested column with a dedicated rule, identified by the rule tag
    KnownStruct(String),
    /// Struct (or union) without a rule
    UnknownStruct,
    /// Map, serialized
    Map,
    /// List or array, serialized
    List,
}

impl ColumnKind {
    /// Resolve the kind of `column`.
    ///
    /// A rule only claims a column whose shape it accepts, so a `names`
    /// column stored as a map is serialized like any other map.
    #[must_use]
    pub fn resolve(column: &ColumnDescriptor, rules: &RuleTable, geometry_column: &str) -> Self {
        if column.name == geometry_column {
            return ColumnKind::Geometry;
        }
        if let Some(rule) = rules.get(&column.name) {
            if column.shape.is_nested() && rule.accepts(column.shape) {
                return ColumnKind::KnownStruct(rule.tag.clone());
            }
            warn!(
                "Flatten rule '{}' does not apply to column '{}' ({})",
                rule.tag, column.name, column.declared_type
            );
        }
        match column.shape {
            TypeShape::Scalar => ColumnKind::Scalar,
            TypeShape::Struct | TypeShape::Union => ColumnKind::UnknownStruct,
            TypeShape::Map => ColumnKind::Map,
            TypeShape::List => ColumnKind::List,
        }
    }

    /// Returns the string representation of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            ColumnKind::Geometry => "geometry",
            ColumnKind::Scalar => "scalar",
            ColumnKind::KnownStruct(tag) => tag,
            ColumnKind::UnknownStruct => "unknown struct",
            ColumnKind::Map => "map",
            ColumnKind::List => "list",
        }
    }
}

/// Flattening decision for one source column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPlan {
    /// Source column name
    pub column: String,
    /// Resolved kind
    pub kind: ColumnKind,
    /// Output attribute names produced from this column, in order
    pub outputs: Vec<String>,
}

/// An output name changed to avoid a collision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    /// Source column
    pub column: String,
    /// Name before de-duplication (already truncated)
    pub requested: String,
    /// Name actually used
    pub assigned: String,
}

/// Result of flattening a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenPlan {
    /// Output projections in schema order
    pub projections: Vec<ProjectionExpression>,
    /// Per-column decisions in schema order
    pub columns: Vec<ColumnPlan>,
    /// Struct columns left out under [`UnknownStructPolicy::Drop`]
    pub dropped: Vec<String>,
    /// Output names renamed to stay unique
    pub renamed: Vec<Rename>,
}

/// Hands out unique attribute names within the ten-byte limit.
#[derive(Debug, Default)]
struct NameAllocator {
    taken: HashSet<String>,
}

impl NameAllocator {
    /// Returns `(requested, assigned)` where `requested` is the truncated
    /// candidate and `assigned` the first free name.
    fn allocate(&mut self, candidate: &str) -> (String, String) {
        let requested = truncate_field_name(candidate);
        if self.taken.insert(requested.to_lowercase()) {
            return (requested.clone(), requested);
        }

        let mut n: usize = 1;
        loop {
            let suffix = format!("_{n}");
            let keep = MAX_FIELD_NAME_LEN.saturating_sub(suffix.len());
            let assigned = format!("{}{suffix}", truncate_to_bytes(&requested, keep));
            if self.taken.insert(assigned.to_lowercase()) {
                return (requested, assigned);
            }
            n += 1;
        }
    }
}

fn json_text(expr: &str) -> String {
    format!("CAST(to_json({expr}) AS VARCHAR)")
}

/// Expand every column of `schema` into output projections.
///
/// # Errors
///
/// Returns [`FlattenError::UnsupportedColumnShape`] when a struct column has
/// no rule and the policy is [`UnknownStructPolicy::Error`].
pub fn flatten(
    schema: &TableSchema,
    rules: &RuleTable,
    options: &ExportOptions,
) -> Result<FlattenPlan, FlattenError> {
    let mut plan = FlattenPlan::default();
    let mut names = NameAllocator::default();

    for column in &schema.columns {
        let kind = ColumnKind::resolve(column, rules, &options.geometry_column);
        let quoted = quote_identifier(&column.name);

        // (candidate output name, source expression)
        let expansions: Vec<(String, String)> = match &kind {
            ColumnKind::Geometry => Vec::new(),
            ColumnKind::KnownStruct(_) => rules
                .get(&column.name)
                .map(|rule| {
                    rule.fields
                        .iter()
                        .map(|f| (f.output_name.clone(), f.expression(&column.name)))
                        .collect()
                })
                .unwrap_or_default(),
            ColumnKind::UnknownStruct => match options.unknown_struct_policy {
                UnknownStructPolicy::Drop => {
                    warn!(
                        "Dropping column '{}': no flatten rule for {}",
                        column.name, column.declared_type
                    );
                    plan.dropped.push(column.name.clone());
                    Vec::new()
                },
                UnknownStructPolicy::Serialize => vec![(column.name.clone(), json_text(&quoted))],
                UnknownStructPolicy::Error => {
                    return Err(FlattenError::UnsupportedColumnShape {
                        column: column.name.clone(),
                        declared_type: column.declared_type.clone(),
                    });
                },
            },
            ColumnKind::Map | ColumnKind::List => vec![(column.name.clone(), json_text(&quoted))],
            ColumnKind::Scalar => vec![(column.name.clone(), quoted)],
        };

        let mut outputs = Vec::with_capacity(expansions.len());
        for (candidate, source_expression) in expansions {
            let (requested, assigned) = names.allocate(&candidate);
            if requested != assigned {
                warn!(
                    "Output name '{requested}' for column '{}' already used, writing '{assigned}'",
                    column.name
                );
                plan.renamed.push(Rename {
                    column: column.name.clone(),
                    requested,
                    assigned: assigned.clone(),
                });
            }
            outputs.push(assigned.clone());
            plan.projections
                .push(ProjectionExpression::new(assigned, source_expression));
        }

        plan.columns.push(ColumnPlan {
            column: column.name.clone(),
            kind,
            outputs,
        });
    }

    Ok(plan)
}
