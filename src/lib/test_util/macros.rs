#[macro_export]
macro_rules! insert_row {
    ($schema:expr, $table:expr, {$($key:expr => $value:expr),* $(,)?}) => {
        $crate::event::RowMutation::insert($schema, $table, $crate::document!($($key => $value),*))
    };
}

#[macro_export]
macro_rules! update_row {
    ($schema:expr, $table:expr, {$($before_key:expr => $before:expr),* $(,)?}, {$($after_key:expr => $after:expr),* $(,)?}) => {
        $crate::event::RowMutation::update(
            $schema,
            $table,
            $crate::document!($($before_key => $before),*),
            $crate::document!($($after_key => $after),*),
        )
    };
}

#[macro_export]
macro_rules! delete_row {
    ($schema:expr, $table:expr, {$($key:expr => $value:expr),* $(,)?}) => {
        $crate::event::RowMutation::delete($schema, $table, $crate::document!($($key => $value),*))
    };
}
