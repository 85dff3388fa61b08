/// Defines the enum with a static field `ALL` containing all variants (in declaration order)
macro_rules! enum_all {
    (
        $(
            $(#[$meta:meta])*
            $vis:vis enum $name:ident {
                $(
                    $(#[$meta_inner:meta])*
                    $variant:ident $(= $variant_value:expr)?
                ),+ $(,)?
            }
        )+
    ) => {
        $(
            $(#[$meta])*
            $vis enum $name {
                $(
                    $(#[$meta_inner])*
                    $variant $(= $variant_value)?
                ),+
            }
            impl $name {
                /// All variants, in declaration order
                $vis const ALL: &'static [Self] = &[
                    $(Self::$variant,)+
                ];
            }
        )+
    };
}
