/// 文件系统操作返回给调用者的错误。
///
/// 只覆盖调用者可以处置的情形；位图与引用计数不一致、
/// inode 魔数损坏一类的内部错误属于卷损坏，直接断言终止。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 空路径，或路径没有最终成分（如对 `/` 执行创建）
    InvalidPath,
    /// 某个路径成分超过 [`NAME_MAX`](crate::NAME_MAX)
    NameTooLong,
    /// 路径中间成分或最终成分不存在
    NotFound,
    /// 创建时最终成分已经存在
    AlreadyExists,
    /// 路径中间成分不是目录
    NotDirectory,
    /// 删除的目录还有 `.`、`..` 之外的目录项
    NotEmpty,
    /// 删除的目录还有其它打开者（fd 或 CWD）
    Busy,
    /// 空闲扇区位图无法满足分配
    NoSpace,
}
