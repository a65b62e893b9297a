//! Server-rendered HTML for the index and cashback pages.

use crate::ledger::{CashbackOutcome, User};

const HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<link rel="stylesheet" href="/static/style.css">"#;

pub fn index(users: &[User], transaction_count: usize) -> String {
    let rows: String = users
        .iter()
        .map(|user| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{:.2}</td></tr>",
                user.id,
                escape(&user.username),
                escape(&user.email),
                user.balance
            )
        })
        .collect();

    format!(
        r#"{HEAD}
<title>Cashback ledger</title>
</head>
<body>
<h1>Cashback ledger</h1>

<h2>Add user</h2>
<form action="/addUser" method="post">
  <input name="username" placeholder="username">
  <input name="email" placeholder="email">
  <button type="submit">Add user</button>
</form>

<h2>Add transaction</h2>
<form action="/addTransaction" method="post">
  <input name="userID" placeholder="user id">
  <input name="amount" placeholder="amount">
  <button type="submit">Add transaction</button>
</form>

<h2>Cashback</h2>
<form action="/cashback" method="post">
  <input name="userID" placeholder="user id">
  <button type="submit">Compute cashback</button>
</form>

<h2>Users</h2>
<table>
<tr><th>ID</th><th>Username</th><th>Email</th><th>Balance</th></tr>
{rows}
</table>
<p>{transaction_count} transaction(s) recorded.</p>
</body>
</html>
"#
    )
}

pub fn cashback(outcome: &CashbackOutcome) -> String {
    let user = &outcome.user;
    format!(
        r#"{HEAD}
<title>Cashback for {username}</title>
</head>
<body>
<h1>Cashback for {username}</h1>
<dl>
  <dt>User ID</dt><dd>{id}</dd>
  <dt>Email</dt><dd>{email}</dd>
  <dt>Cashback</dt><dd>{cashback:.2}</dd>
  <dt>Qualifying transactions</dt><dd>{qualifying}</dd>
  <dt>Balance</dt><dd>{balance:.2}</dd>
</dl>
<a href="/">Back</a>
</body>
</html>
"#,
        username = escape(&user.username),
        id = user.id,
        email = escape(&user.email),
        cashback = outcome.cashback,
        qualifying = outcome.qualifying,
        balance = user.balance,
    )
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
