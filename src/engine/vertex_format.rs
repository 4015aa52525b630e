//! ### English
//! Vertex format descriptors used as lookup keys for batches and vertex array objects.
//!
//! ### 中文
//! 顶点格式描述，作为批次与 VAO 缓存的查找键。

use crate::engine::error::{RenderError, Result};

/// ### English
/// Upper bound on attributes per format (matches the GL minimum for `MAX_VERTEX_ATTRIBS`).
///
/// ### 中文
/// 每个格式的属性数量上限（与 GL `MAX_VERTEX_ATTRIBS` 最小保证值一致）。
pub const MAX_VERTEX_ATTRIBUTES: usize = 16;

/// ### English
/// Scalar type of one vertex attribute component.
///
/// ### 中文
/// 顶点属性分量的标量类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeType {
    F32,
    F16,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
}

impl AttributeType {
    /// ### English
    /// Size of one component in bytes.
    ///
    /// ### 中文
    /// 单个分量的字节大小。
    pub const fn size(self) -> u32 {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::F16 | Self::I16 | Self::U16 => 2,
            Self::F32 | Self::I32 | Self::U32 => 4,
        }
    }

    /// ### English
    /// Integer types may be fed to the shader as floats (optionally normalized) or as integers;
    /// float types are always fed as floats.
    ///
    /// ### 中文
    /// 整数类型可作为浮点（可选归一化）或整数送入着色器；浮点类型始终作为浮点。
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F16)
    }
}

/// ### English
/// One attribute: type, component count (1..=4), normalization flag and byte offset.
///
/// ### 中文
/// 单个属性：类型、分量数（1..=4）、归一化标记与字节偏移。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexAttribute {
    pub ty: AttributeType,
    pub components: u8,
    pub normalized: bool,
    pub offset: u32,
}

impl VertexAttribute {
    pub const fn new(ty: AttributeType, components: u8, normalized: bool, offset: u32) -> Self {
        Self {
            ty,
            components,
            normalized,
            offset,
        }
    }

    /// ### English
    /// Byte end of this attribute inside a vertex, or `None` if it does not fit in `u32`.
    ///
    /// ### 中文
    /// 该属性在单个顶点内的结束字节位置；超出 `u32` 范围时为 `None`。
    pub const fn end(&self) -> Option<u32> {
        match self.ty.size().checked_mul(self.components as u32) {
            Some(size) => self.offset.checked_add(size),
            None => None,
        }
    }
}

/// ### English
/// Ordered attribute list. Equality, hashing and ordering are element-wise over the list, so two
/// formats built through different paths but with identical attributes are the same key.
///
/// ### 中文
/// 有序属性列表。相等、哈希与排序均按元素逐一比较，因此通过不同方式构造但属性相同的两个
/// 格式是同一个键。
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexFormat {
    attributes: Vec<VertexAttribute>,
}

impl VertexFormat {
    /// ### English
    /// Builds a validated format.
    ///
    /// #### Parameters
    /// - `attributes`: Attribute list in shader location order (at most 16).
    ///
    /// ### 中文
    /// 构造并校验顶点格式。
    ///
    /// #### 参数
    /// - `attributes`：按着色器 location 顺序排列的属性列表（最多 16 个）。
    pub fn new(attributes: impl IntoIterator<Item = VertexAttribute>) -> Result<Self> {
        let attributes: Vec<VertexAttribute> = attributes.into_iter().collect();
        if attributes.len() > MAX_VERTEX_ATTRIBUTES {
            return Err(RenderError::InvalidVertexFormat(format!(
                "{} attributes exceed the limit of {MAX_VERTEX_ATTRIBUTES}",
                attributes.len()
            )));
        }
        if let Some(bad) = attributes
            .iter()
            .position(|attr| !(1..=4).contains(&attr.components))
        {
            return Err(RenderError::InvalidVertexFormat(format!(
                "attribute {bad} has {} components",
                attributes[bad].components
            )));
        }
        if let Some(bad) = attributes.iter().position(|attr| attr.end().is_none()) {
            return Err(RenderError::InvalidVertexFormat(format!(
                "attribute {bad} at offset {} overflows the vertex",
                attributes[bad].offset
            )));
        }
        Ok(Self { attributes })
    }

    /// ### English
    /// Appends one attribute (builder style).
    ///
    /// ### 中文
    /// 追加一个属性（builder 风格）。
    pub fn with(
        mut self,
        ty: AttributeType,
        components: u8,
        normalized: bool,
        offset: u32,
    ) -> Result<Self> {
        self.attributes
            .push(VertexAttribute::new(ty, components, normalized, offset));
        Self::new(self.attributes)
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// ### English
    /// Smallest stride that fits every attribute.
    ///
    /// ### 中文
    /// 能容纳全部属性的最小步长。
    pub fn packed_stride(&self) -> u32 {
        self.attributes
            .iter()
            .filter_map(VertexAttribute::end)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(format: &VertexFormat) -> u64 {
        let mut hasher = DefaultHasher::new();
        format.hash(&mut hasher);
        hasher.finish()
    }

    fn position_uv() -> VertexFormat {
        VertexFormat::new([
            VertexAttribute::new(AttributeType::F32, 3, false, 0),
            VertexAttribute::new(AttributeType::F32, 2, false, 12),
        ])
        .unwrap()
    }

    #[test]
    fn identical_attributes_are_equal_and_hash_alike() {
        let built = VertexFormat::default()
            .with(AttributeType::F32, 3, false, 0)
            .unwrap()
            .with(AttributeType::F32, 2, false, 12)
            .unwrap();
        let direct = position_uv();

        assert_eq!(built, direct);
        assert_eq!(hash_of(&built), hash_of(&direct));
        assert_eq!(built.cmp(&direct), std::cmp::Ordering::Equal);
    }

    #[test]
    fn any_attribute_difference_breaks_equality() {
        let base = position_uv();
        let variants = [
            VertexFormat::new([
                VertexAttribute::new(AttributeType::F16, 3, false, 0),
                VertexAttribute::new(AttributeType::F32, 2, false, 12),
            ]),
            VertexFormat::new([
                VertexAttribute::new(AttributeType::F32, 4, false, 0),
                VertexAttribute::new(AttributeType::F32, 2, false, 12),
            ]),
            VertexFormat::new([
                VertexAttribute::new(AttributeType::F32, 3, true, 0),
                VertexAttribute::new(AttributeType::F32, 2, false, 12),
            ]),
            VertexFormat::new([VertexAttribute::new(AttributeType::F32, 3, false, 0)]),
        ];

        for variant in variants {
            let variant = variant.unwrap();
            assert_ne!(variant, base);
            assert_ne!(variant.cmp(&base), std::cmp::Ordering::Equal);
        }
    }

    #[test]
    fn rejects_too_many_attributes() {
        let attrs = (0..17).map(|i| VertexAttribute::new(AttributeType::U8, 1, false, i));
        assert!(matches!(
            VertexFormat::new(attrs),
            Err(RenderError::InvalidVertexFormat(_))
        ));
    }

    #[test]
    fn rejects_zero_components() {
        let attrs = [VertexAttribute::new(AttributeType::F32, 0, false, 0)];
        assert!(VertexFormat::new(attrs).is_err());
    }

    #[test]
    fn rejects_offsets_that_overflow_the_vertex() {
        let attrs = [VertexAttribute::new(AttributeType::F32, 4, false, u32::MAX - 8)];
        assert_eq!(attrs[0].end(), None);
        assert!(matches!(
            VertexFormat::new(attrs),
            Err(RenderError::InvalidVertexFormat(_))
        ));
        let edge = VertexAttribute::new(AttributeType::F32, 4, false, u32::MAX - 16);
        assert_eq!(edge.end(), Some(u32::MAX));
        assert!(
            VertexFormat::default()
                .with(AttributeType::U8, 4, true, u32::MAX - 3)
                .is_err()
        );
    }

    #[test]
    fn packed_stride_covers_last_attribute() {
        assert_eq!(position_uv().packed_stride(), 20);
        assert_eq!(VertexFormat::default().packed_stride(), 0);
    }
}
